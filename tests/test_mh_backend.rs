use std::{
    fs,
    io::{self, Read, Write},
    path::Path,
};
use tempfile::tempdir;

use mailbox_lib::{
    CheckStatsFlags, CheckStatsStatus, CheckStatus, Flag, LockGuard, LockService, MailboxType,
    MsgOpenFlags, Mx, MxConfig, OpenFlags,
};

struct NoLocks;

impl LockService for NoLocks {
    fn try_acquire(&self, resource: &Path) -> io::Result<Option<LockGuard>> {
        Ok(Some(LockGuard::new(resource.to_owned(), ())))
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn mx(folder: &Path) -> Mx {
    Mx::new(MxConfig {
        folder: folder.to_owned(),
        mbox_type: MailboxType::Mh,
        ..MxConfig::default()
    })
    .with_lock_service(NoLocks)
}

fn setup(dir: &Path) -> String {
    let root = dir.join("inbox");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("1"), "Subject: one\n\nfirst\n").unwrap();
    fs::write(root.join("2"), "Subject: two\n\nsecond\n").unwrap();
    fs::write(root.join(".mh_sequences"), "unseen: 2\ncur: 1\n").unwrap();
    root.to_string_lossy().to_string()
}

#[test]
fn test_mh_open_and_read() {
    init_logger();
    let dir = tempdir().unwrap();
    let path = setup(dir.path());

    let mut mx = mx(dir.path());
    assert_eq!(MailboxType::Mh, mx.path_probe(&path, None));
    assert!(!mx.path_is_empty(&path).unwrap());

    let mut mailbox = mx.mailbox(&path).unwrap();
    mx.mbox_open(&mut mailbox, OpenFlags::empty()).unwrap();
    assert_eq!(2, mailbox.msg_count());
    assert!(mailbox.email(0).unwrap().flags.is_seen());
    assert!(!mailbox.email(1).unwrap().flags.is_seen());
    assert_eq!(1, mailbox.stats().unread);

    let mut msg = mx.msg_open(&mut mailbox, 1).unwrap();
    let mut content = String::new();
    msg.read_to_string(&mut content).unwrap();
    assert_eq!("Subject: two\n\nsecond\n", content);
    mx.msg_close(&mut mailbox, &mut msg).unwrap();

    mx.mbox_close(&mut mailbox).unwrap();
}

#[test]
fn test_mh_commit_takes_next_number() {
    init_logger();
    let dir = tempdir().unwrap();
    let path = setup(dir.path());

    let mut mx = mx(dir.path());
    let mut mailbox = mx.mailbox(&path).unwrap();
    mx.mbox_open(&mut mailbox, OpenFlags::empty()).unwrap();

    let mut msg = mx
        .msg_open_new(&mut mailbox, None, MsgOpenFlags::empty())
        .unwrap();
    write!(msg, "Subject: three\n\nthird\n").unwrap();
    let tmp = msg.path().to_owned();
    mx.msg_commit(&mut mailbox, &mut msg).unwrap();
    mx.msg_close(&mut mailbox, &mut msg).unwrap();

    assert!(!tmp.exists());
    let expected = Path::new(mailbox.path()).join("3");
    assert_eq!(Some(expected.as_path()), msg.committed_path());
    assert_eq!(3, mailbox.msg_count());
    assert_eq!("3", mailbox.email(2).unwrap().id);
    assert!(fs::read_to_string(Path::new(&path).join(".mh_sequences"))
        .unwrap()
        .contains("unseen: 2-3\n"));

    assert_eq!(CheckStatus::NoChange, mx.mbox_check(&mut mailbox).unwrap());
    mx.mbox_close(&mut mailbox).unwrap();
}

#[test]
fn test_mh_draft_survives_reopen() {
    init_logger();
    let dir = tempdir().unwrap();
    let path = setup(dir.path());

    let mut mx = mx(dir.path());
    let mut mailbox = mx.mailbox(&path).unwrap();
    mx.mbox_open(&mut mailbox, OpenFlags::empty()).unwrap();
    let mut msg = mx
        .msg_open_new(&mut mailbox, None, MsgOpenFlags::SET_DRAFT)
        .unwrap();
    write!(msg, "Subject: draft\n\nnot yet\n").unwrap();
    mx.msg_commit(&mut mailbox, &mut msg).unwrap();
    mx.msg_close(&mut mailbox, &mut msg).unwrap();
    assert!(mailbox.email(2).unwrap().flags.contains(&Flag::Draft));
    mx.mbox_close(&mut mailbox).unwrap();

    let seqs = fs::read_to_string(Path::new(&path).join(".mh_sequences")).unwrap();
    assert!(seqs.contains("draft: 3\n"));
    assert!(seqs.contains("cur: 1\n"));

    let mut mailbox = mx.mailbox(&path).unwrap();
    mx.mbox_open(&mut mailbox, OpenFlags::empty()).unwrap();
    assert!(mailbox.email(2).unwrap().flags.contains(&Flag::Draft));
    assert!(!mailbox.email(0).unwrap().flags.contains(&Flag::Draft));
    mx.mbox_close(&mut mailbox).unwrap();
}

#[test]
fn test_mh_failed_commit_publishes_nothing() {
    init_logger();
    let dir = tempdir().unwrap();
    let path = setup(dir.path());

    let mut mx = mx(dir.path());
    let mut mailbox = mx.mailbox(&path).unwrap();
    mx.mbox_open(&mut mailbox, OpenFlags::empty()).unwrap();

    // sequences that cannot be read
    let seqs = Path::new(&path).join(".mh_sequences");
    fs::remove_file(&seqs).unwrap();
    fs::create_dir(&seqs).unwrap();

    let mut msg = mx
        .msg_open_new(&mut mailbox, None, MsgOpenFlags::empty())
        .unwrap();
    write!(msg, "Subject: three\n\nthird\n").unwrap();
    assert!(mx.msg_commit(&mut mailbox, &mut msg).is_err());
    mx.msg_close(&mut mailbox, &mut msg).unwrap();

    assert!(!Path::new(&path).join("3").exists());
    assert_eq!(2, mailbox.msg_count());

    fs::remove_dir(&seqs).unwrap();
    mx.mbox_close(&mut mailbox).unwrap();
}

#[test]
fn test_mh_sync_updates_sequences() {
    init_logger();
    let dir = tempdir().unwrap();
    let path = setup(dir.path());

    let mut mx = mx(dir.path());
    let mut mailbox = mx.mailbox(&path).unwrap();
    mx.mbox_open(&mut mailbox, OpenFlags::empty()).unwrap();

    mailbox.email_mut(0).unwrap().set_flag(Flag::Deleted, true);
    mailbox.email_mut(1).unwrap().set_flag(Flag::Seen, true);
    mailbox.email_mut(1).unwrap().set_flag(Flag::Answered, true);
    assert_eq!(CheckStatus::NoChange, mx.mbox_sync(&mut mailbox).unwrap());

    assert!(!Path::new(&path).join("1").exists());
    assert_eq!(1, mailbox.msg_count());
    let email = mailbox.email(0).unwrap();
    assert_eq!("2", email.id);
    assert!(email.flags.is_seen());
    assert!(email.flags.contains(&Flag::Answered));

    let seqs = fs::read_to_string(Path::new(&path).join(".mh_sequences")).unwrap();
    assert!(!seqs.contains("unseen"));
    assert!(seqs.contains("replied: 2\n"));
    assert!(seqs.contains("cur: 1\n"));

    mx.mbox_close(&mut mailbox).unwrap();

    let mut mailbox = mx.mailbox(&path).unwrap();
    assert_eq!(
        CheckStatsStatus::NoChange,
        mx.mbox_check_stats(&mut mailbox, CheckStatsFlags::empty())
            .unwrap()
    );
    assert_eq!(1, mailbox.msg_count());
}

#[test]
fn test_mh_external_delivery_is_new_mail() {
    init_logger();
    let dir = tempdir().unwrap();
    let path = setup(dir.path());

    let mut mx = mx(dir.path());
    let mut mailbox = mx.mailbox(&path).unwrap();
    mx.mbox_open(&mut mailbox, OpenFlags::empty()).unwrap();

    fs::write(Path::new(&path).join("5"), "Subject: five\n\nfifth\n").unwrap();
    fs::write(Path::new(&path).join(".mh_sequences"), "unseen: 2 5\n").unwrap();

    assert_eq!(CheckStatus::NewMail, mx.mbox_check(&mut mailbox).unwrap());
    assert_eq!(3, mailbox.msg_count());
    assert_eq!(Some("five".into()), mailbox.email(2).unwrap().subject);
    assert_eq!(2, mailbox.stats().unread);

    mx.mbox_close(&mut mailbox).unwrap();
}

#[test]
fn test_mh_append_creates_folder() {
    init_logger();
    let dir = tempdir().unwrap();
    let path = dir.path().join("outbox").to_string_lossy().to_string();

    let mut mx = mx(dir.path());
    let mut mailbox = mx.mailbox(&path).unwrap();
    mx.mbox_open_append(&mut mailbox, OpenFlags::empty()).unwrap();
    assert_eq!(MailboxType::Mh, mailbox.kind());
    assert!(mx.path_is_empty(&path).unwrap());

    let mut msg = mx
        .msg_open_new(&mut mailbox, None, MsgOpenFlags::empty())
        .unwrap();
    write!(msg, "Subject: out\n\ngone\n").unwrap();
    mx.msg_commit(&mut mailbox, &mut msg).unwrap();
    mx.msg_close(&mut mailbox, &mut msg).unwrap();
    mx.mbox_close(&mut mailbox).unwrap();

    assert!(Path::new(&path).join("1").is_file());
    assert!(!mx.path_is_empty(&path).unwrap());
}
