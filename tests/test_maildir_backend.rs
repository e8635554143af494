use std::{
    fs,
    io::{self, Read, Write},
    path::Path,
};
use tempfile::tempdir;

use mailbox_lib::{
    Backend, CheckStatus, Flag, LockGuard, LockService, MaildirBackend, MailboxType, MsgOpenFlags,
    Mx, MxConfig, OpenFlags, SqliteHeaderCache,
};

/// Lock service that never contends.
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
        mbox_type: MailboxType::Maildir,
        ..MxConfig::default()
    })
    .with_lock_service(NoLocks)
}

fn create_maildir(root: &Path) {
    for dir in ["cur", "new", "tmp"] {
        fs::create_dir_all(root.join(dir)).unwrap();
    }
}

fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn test_maildir_external_read_is_a_flag_change() {
    init_logger();
    let dir = tempdir().unwrap();
    let root = dir.path().join("inbox");
    create_maildir(&root);
    fs::write(root.join("new").join("1000.a.host"), "Subject: one\n\nfirst\n").unwrap();
    fs::write(root.join("new").join("1001.b.host"), "Subject: two\n\nsecond\n").unwrap();
    let path = root.to_string_lossy().to_string();

    // two independent handles over the same store
    let mut mx_a = mx(dir.path());
    let mut mx_b = mx(dir.path());
    let mut a = mx_a.mailbox(&path).unwrap();
    let mut b = mx_b.mailbox(&path).unwrap();
    assert_eq!(MailboxType::Maildir, b.kind());
    mx_a.mbox_open(&mut a, OpenFlags::empty()).unwrap();
    mx_b.mbox_open(&mut b, OpenFlags::empty()).unwrap();
    assert_eq!(2, b.msg_count());
    assert!(!b.email(0).unwrap().flags.is_seen());

    // the message is read elsewhere: it moves from new/ to cur/
    fs::rename(
        root.join("new").join("1000.a.host"),
        root.join("cur").join("1000.a.host:2,S"),
    )
    .unwrap();

    assert_eq!(CheckStatus::Flags, mx_b.mbox_check(&mut b).unwrap());
    assert_eq!(2, b.msg_count());
    let email = b.email(0).unwrap();
    assert_eq!("1000.a.host", email.id);
    assert!(email.flags.is_seen());

    // the index follows the moved file
    let mut msg = mx_b.msg_open(&mut b, 0).unwrap();
    let mut content = String::new();
    msg.read_to_string(&mut content).unwrap();
    assert_eq!("Subject: one\n\nfirst\n", content);
    mx_b.msg_close(&mut b, &mut msg).unwrap();

    // a vanished message means the index must be rebuilt
    fs::remove_file(root.join("new").join("1001.b.host")).unwrap();
    assert_eq!(CheckStatus::Reopened, mx_b.mbox_check(&mut b).unwrap());
    assert_eq!(1, b.msg_count());

    mx_b.mbox_close(&mut b).unwrap();
    mx_a.mbox_close(&mut a).unwrap();
}

#[test]
fn test_maildir_append_creates_store() {
    init_logger();
    let dir = tempdir().unwrap();
    let path = dir.path().join("sent").to_string_lossy().to_string();

    let mut mx = mx(dir.path());
    let mut mailbox = mx.mailbox(&path).unwrap();
    assert_eq!(MailboxType::Unknown, mailbox.kind());
    mx.mbox_open_append(&mut mailbox, OpenFlags::empty()).unwrap();
    assert_eq!(MailboxType::Maildir, mailbox.kind());
    assert_eq!(MailboxType::Maildir, mx.path_probe(&path, None));
    assert!(mx.path_is_empty(&path).unwrap());

    let mut msg = mx
        .msg_open_new(&mut mailbox, None, MsgOpenFlags::empty())
        .unwrap();
    assert!(msg.path().starts_with(Path::new(&path).join("tmp")));
    write!(msg, "Subject: sent\n\nbye\n").unwrap();
    mx.msg_commit(&mut mailbox, &mut msg).unwrap();
    let committed = msg.committed_path().unwrap().to_owned();
    assert!(committed.starts_with(Path::new(&path).join("new")));
    assert_ne!(msg.path(), committed.as_path());
    mx.msg_close(&mut mailbox, &mut msg).unwrap();
    mx.mbox_close(&mut mailbox).unwrap();

    assert!(!mx.path_is_empty(&path).unwrap());
    assert!(entries(&Path::new(&path).join("tmp")).is_empty());
}

#[test]
fn test_maildir_draft_goes_to_cur() {
    init_logger();
    let dir = tempdir().unwrap();
    let root = dir.path().join("drafts");
    create_maildir(&root);

    let mut mx = mx(dir.path());
    let mut mailbox = mx.mailbox(&root.to_string_lossy()).unwrap();
    mx.mbox_open(&mut mailbox, OpenFlags::empty()).unwrap();

    let mut msg = mx
        .msg_open_new(&mut mailbox, None, MsgOpenFlags::SET_DRAFT)
        .unwrap();
    write!(msg, "Subject: draft\n\nwip\n").unwrap();
    mx.msg_commit(&mut mailbox, &mut msg).unwrap();
    mx.msg_close(&mut mailbox, &mut msg).unwrap();

    assert_eq!(1, mailbox.msg_count());
    assert!(mailbox.email(0).unwrap().flags.contains(&Flag::Draft));
    let cur = entries(&root.join("cur"));
    assert_eq!(1, cur.len());
    assert!(cur[0].ends_with(":2,T"));

    // the committed message is visible through the index
    let mut msg = mx.msg_open(&mut mailbox, 0).unwrap();
    assert!(msg.committed_path().unwrap().starts_with(root.join("cur")));
    let mut content = String::new();
    msg.read_to_string(&mut content).unwrap();
    assert_eq!("Subject: draft\n\nwip\n", content);
    mx.msg_close(&mut mailbox, &mut msg).unwrap();

    assert_eq!(CheckStatus::NoChange, mx.mbox_check(&mut mailbox).unwrap());
    mx.mbox_close(&mut mailbox).unwrap();
}

#[test]
fn test_maildir_sync_renames_and_deletes() {
    init_logger();
    let dir = tempdir().unwrap();
    let root = dir.path().join("inbox");
    create_maildir(&root);
    fs::write(root.join("new").join("1000.a.host"), "Subject: one\n\nfirst\n").unwrap();
    fs::write(root.join("cur").join("1001.b.host:2,S"), "Subject: two\n\nsecond\n").unwrap();

    let mut mx = mx(dir.path());
    let mut mailbox = mx.mailbox(&root.to_string_lossy()).unwrap();
    mx.mbox_open(&mut mailbox, OpenFlags::empty()).unwrap();
    assert_eq!(2, mailbox.msg_count());
    assert_eq!(1, mailbox.stats().unread);

    mailbox.email_mut(0).unwrap().set_flag(Flag::Flagged, true);
    mailbox.email_mut(1).unwrap().set_flag(Flag::Deleted, true);
    assert_eq!(CheckStatus::NoChange, mx.mbox_sync(&mut mailbox).unwrap());

    assert_eq!(1, mailbox.msg_count());
    assert!(entries(&root.join("new")).is_empty());
    assert_eq!(vec!["1000.a.host:2,F"], entries(&root.join("cur")));
    assert!(mailbox.email(0).unwrap().flags.is_flagged());
    assert!(!mailbox.email(0).unwrap().changed);

    mx.mbox_close(&mut mailbox).unwrap();
}

#[test]
fn test_maildir_commit_feeds_header_cache() {
    init_logger();
    let dir = tempdir().unwrap();
    let root = dir.path().join("inbox");
    create_maildir(&root);
    let hcache_path = dir.path().join("hcache.db");

    let mut mx = Mx::new(MxConfig {
        folder: dir.path().to_owned(),
        hcache_path: Some(hcache_path.clone()),
        ..MxConfig::default()
    })
    .with_lock_service(NoLocks);
    let mut mailbox = mx.mailbox(&root.to_string_lossy()).unwrap();
    mx.mbox_open(&mut mailbox, OpenFlags::empty()).unwrap();

    let mut msg = mx
        .msg_open_new(&mut mailbox, None, MsgOpenFlags::SET_DRAFT)
        .unwrap();
    write!(msg, "Subject: cached\n\nbody\n").unwrap();
    mx.msg_commit(&mut mailbox, &mut msg).unwrap();
    mx.msg_close(&mut mailbox, &mut msg).unwrap();

    let id = mailbox.email(0).unwrap().id.clone();
    let cache = SqliteHeaderCache::open(&hcache_path).unwrap();
    let cached = cache.fetch(mailbox.path(), &id).unwrap().unwrap();
    assert_eq!(Some("cached".into()), cached.subject);
    assert!(cached.flags.contains(&Flag::Draft));

    mx.mbox_close(&mut mailbox).unwrap();
}

#[test]
fn test_maildirs_under_folder_share_one_account() {
    init_logger();
    let dir = tempdir().unwrap();
    let folder = fs::canonicalize(dir.path()).unwrap().join("Mail");
    create_maildir(&folder.join("a"));
    create_maildir(&folder.join("b"));
    let outside = fs::canonicalize(dir.path()).unwrap().join("elsewhere");
    create_maildir(&outside);

    let mut mx = mx(&folder);
    let mut a = mx.mailbox("=a").unwrap();
    let mut b = mx.mailbox("=b").unwrap();
    mx.mbox_open(&mut a, OpenFlags::empty()).unwrap();
    mx.mbox_open(&mut b, OpenFlags::empty()).unwrap();
    assert!(a.account().is_some());
    assert_eq!(a.account(), b.account());
    assert_eq!(1, mx.accounts().len());

    let owner = a.account().unwrap();
    for _ in 0..2 {
        assert_eq!(owner, mx.ac_find(MailboxType::Maildir, a.path()).unwrap().id());
        assert_eq!(owner, mx.ac_find(MailboxType::Maildir, b.path()).unwrap().id());
    }
    assert_eq!(Some(a.id()), mx.mbox_find(owner, a.path()));
    assert_eq!(Some(b.id()), mx.mbox_find(owner, b.path()));

    // a maildir outside the folder stands alone
    let mut other = mx.mailbox(&outside.to_string_lossy()).unwrap();
    mx.mbox_open(&mut other, OpenFlags::empty()).unwrap();
    assert_ne!(a.account(), other.account());
    assert_eq!(2, mx.accounts().len());
    mx.mbox_close(&mut other).unwrap();

    mx.mbox_close(&mut a).unwrap();
    assert_eq!(1, mx.accounts().get(owner).unwrap().len());
    mx.mbox_close(&mut b).unwrap();
    assert!(mx.accounts().is_empty());
}

#[test]
fn test_maildir_paths() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("inbox");
    create_maildir(&root);
    let root = root.to_string_lossy().to_string();

    assert_eq!(
        root,
        MaildirBackend.path_parent(format!("{}/cur", root)).unwrap()
    );
    assert_eq!(
        dir.path().to_string_lossy(),
        MaildirBackend.path_parent(root.clone()).unwrap()
    );
    let meta = fs::metadata(&root).unwrap();
    assert_eq!(
        MailboxType::Maildir,
        MaildirBackend.path_probe(&root, Some(&meta))
    );
}
