use std::{
    cell::Cell,
    fs, io,
    path::{Path, PathBuf},
    rc::Rc,
};
use tempfile::tempdir;

use mailbox_lib::{
    CheckStatus, Email, Flag, LockGuard, LockService, MsgOpenFlags, Mx, MxConfig, OpenFlags,
    ProcLockService,
};

const INBOX: &str = concat!(
    "From alice@localhost Thu Jan  1 00:00:00 1970\n",
    "Subject: one\n",
    "\n",
    "first\n",
    "\n",
    "From bob@localhost Thu Jan  1 00:00:00 1970\n",
    "Subject: two\n",
    "\n",
    "second\n",
    "\n",
);

/// Lock service held by another process while the switch is on.
#[derive(Clone, Default)]
struct ContendedLocks {
    held_elsewhere: Rc<Cell<bool>>,
    acquired: Rc<Cell<usize>>,
}

impl LockService for ContendedLocks {
    fn try_acquire(&self, resource: &Path) -> io::Result<Option<LockGuard>> {
        if self.held_elsewhere.get() {
            return Ok(None);
        }
        self.acquired.set(self.acquired.get() + 1);
        Ok(Some(LockGuard::new(resource.to_owned(), ())))
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn snapshot(emails: &[Email]) -> Vec<(String, Vec<Flag>, bool)> {
    emails
        .iter()
        .map(|email| {
            (
                email.id.clone(),
                email.flags.iter().cloned().collect(),
                email.changed,
            )
        })
        .collect()
}

#[test]
fn test_locked_sync_changes_nothing() {
    init_logger();
    let dir = tempdir().unwrap();
    let path = dir.path().join("inbox");
    fs::write(&path, INBOX).unwrap();

    let locks = ContendedLocks::default();
    let mut mx = Mx::new(MxConfig {
        folder: dir.path().to_owned(),
        ..MxConfig::default()
    })
    .with_lock_service(locks.clone());

    let mut mailbox = mx.mailbox(&path.to_string_lossy()).unwrap();
    mx.mbox_open(&mut mailbox, OpenFlags::empty()).unwrap();
    mailbox.email_mut(0).unwrap().set_flag(Flag::Deleted, true);

    locks.held_elsewhere.set(true);
    let count = mailbox.msg_count();
    let before = snapshot(mailbox.emails());

    assert_eq!(CheckStatus::Locked, mx.mbox_sync(&mut mailbox).unwrap());
    assert_eq!(count, mailbox.msg_count());
    assert_eq!(before, snapshot(mailbox.emails()));
    assert_eq!(INBOX, fs::read_to_string(&path).unwrap());

    assert_eq!(CheckStatus::Locked, mx.mbox_check(&mut mailbox).unwrap());
    assert_eq!(before, snapshot(mailbox.emails()));

    // a commit cannot proceed without the lock either
    let mut msg = mx
        .msg_open_new(&mut mailbox, None, MsgOpenFlags::ADD_FROM)
        .unwrap();
    assert!(mx.msg_commit(&mut mailbox, &mut msg).is_err());
    mx.msg_close(&mut mailbox, &mut msg).unwrap();
    assert_eq!(INBOX, fs::read_to_string(&path).unwrap());

    // the lock is released: the retry goes through
    locks.held_elsewhere.set(false);
    assert_eq!(CheckStatus::NoChange, mx.mbox_sync(&mut mailbox).unwrap());
    assert_eq!(count - 1, mailbox.msg_count());
    assert!(!fs::read_to_string(&path).unwrap().contains("first"));
    assert_eq!(1, locks.acquired.get());

    mx.mbox_close(&mut mailbox).unwrap();
}

#[test]
fn test_locked_close_still_closes() {
    init_logger();
    let dir = tempdir().unwrap();
    let path = dir.path().join("inbox");
    fs::write(&path, INBOX).unwrap();

    let locks = ContendedLocks::default();
    let mut mx = Mx::new(MxConfig::default()).with_lock_service(locks.clone());

    let mut mailbox = mx.mailbox(&path.to_string_lossy()).unwrap();
    mx.mbox_open(&mut mailbox, OpenFlags::empty()).unwrap();
    mailbox.email_mut(1).unwrap().set_flag(Flag::Seen, true);

    locks.held_elsewhere.set(true);
    assert_eq!(CheckStatus::Locked, mx.mbox_close(&mut mailbox).unwrap());
    assert!(!mailbox.is_open());
    assert_eq!(None, mailbox.account());
    assert!(mx.accounts().is_empty());
    assert_eq!(INBOX, fs::read_to_string(&path).unwrap());
}

#[test]
fn test_proc_lock_service_contention() {
    init_logger();
    let dir = tempdir().unwrap();
    let resource = dir.path().join("inbox");
    fs::write(&resource, INBOX).unwrap();

    let service = ProcLockService::default();
    assert_eq!(
        PathBuf::from(format!("{}.lock", resource.display())),
        service.lock_path(&resource)
    );

    let guard = service.try_acquire(&resource).unwrap();
    assert!(guard.is_some());
    drop(guard);
    assert!(service.try_acquire(&resource).unwrap().is_some());
}
