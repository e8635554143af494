use std::{
    io::{Read, Write},
    path::Path,
    process::Command,
};
use tempfile::tempdir;

use mailbox_lib::{
    CheckStatsFlags, MailboxType, MsgOpenFlags, Mx, MxConfig, OpenFlags, OpenStatus,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn has_gzip() -> bool {
    Command::new("gzip")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn append(mx: &mut Mx, path: &str, content: &str) {
    let mut mailbox = mx.mailbox(path).unwrap();
    mx.mbox_open_append(&mut mailbox, OpenFlags::empty()).unwrap();
    assert_eq!(MailboxType::Compressed, mailbox.kind());
    let mut msg = mx
        .msg_open_new(&mut mailbox, None, MsgOpenFlags::ADD_FROM)
        .unwrap();
    write!(msg, "{}", content).unwrap();
    mx.msg_commit(&mut mailbox, &mut msg).unwrap();
    mx.msg_close(&mut mailbox, &mut msg).unwrap();
    mx.mbox_close(&mut mailbox).unwrap();
}

#[test]
fn test_compressed_append_then_read() {
    init_logger();
    if !has_gzip() {
        eprintln!("gzip not found, skipping");
        return;
    }

    let dir = tempdir().unwrap();
    let path = dir.path().join("archive.gz").to_string_lossy().to_string();
    let mut mx = Mx::new(MxConfig {
        folder: dir.path().to_owned(),
        ..MxConfig::default()
    });

    // the store is created on first append
    append(&mut mx, &path, "Subject: one\n\nfirst\n");
    assert!(Path::new(&path).is_file());
    assert_eq!(MailboxType::Compressed, mx.path_probe(&path, None));
    assert!(!mx.path_is_empty(&path).unwrap());

    // later appends go straight to the compressed file
    append(&mut mx, &path, "Subject: two\n\nsecond\n");

    let mut mailbox = mx.mailbox(&path).unwrap();
    assert_eq!(
        OpenStatus::Ok,
        mx.mbox_open(&mut mailbox, OpenFlags::empty()).unwrap()
    );
    assert_eq!(2, mailbox.msg_count());
    assert_eq!(1, mx.msg_padding_size(&mailbox));

    let mut msg = mx.msg_open(&mut mailbox, 1).unwrap();
    let mut content = String::new();
    msg.read_to_string(&mut content).unwrap();
    assert!(content.contains("second"));
    mx.msg_close(&mut mailbox, &mut msg).unwrap();
    mx.mbox_close(&mut mailbox).unwrap();

    // stats of a closed compressed mailbox come from a throwaway copy
    let mut mailbox = mx.mailbox(&path).unwrap();
    mx.mbox_check_stats(&mut mailbox, CheckStatsFlags::empty())
        .unwrap();
    assert_eq!(2, mailbox.stats().total);
    assert_eq!(None, mailbox.account());
}
