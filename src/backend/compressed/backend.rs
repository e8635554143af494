//! Compressed backend module.
//!
//! This module contains the definition of the compressed backend. A
//! compressed mailbox is decompressed into a private plain copy, every
//! operation is then delegated to the flat file backend working on
//! that copy, and the copy is compressed back when it changed.

use log::{debug, info, warn};
use std::{
    env,
    fs::{self, FileTimes},
    io,
    path::{Path, PathBuf},
    result,
};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    backend::{self, config::default_compress_hooks, mbox::MboxBackend, path, Backend, Context},
    process, CheckStatsFlags, CheckStatsStatus, CheckStatus, CompressHook, Email, Mailbox,
    MailboxType, Message, MsgOpenFlags, MxConfig, OpenFlags, OpenStatus, Snapshot,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find compression hook for {0}")]
    FindHookError(String),
    #[error("cannot decompress {1}")]
    DecompressError(#[source] process::Error, String),
    #[error("cannot compress {1}")]
    CompressError(#[source] process::Error, String),
    #[error("cannot create plain copy {1}")]
    CreatePlainError(#[source] io::Error, PathBuf),
    #[error("cannot remove plain copy {1}")]
    RemovePlainError(#[source] io::Error, PathBuf),
    #[error("cannot set times of plain copy {1}")]
    SetTimesError(#[source] io::Error, PathBuf),
}

pub type Result<T> = result::Result<T, Error>;

/// Represents the compressed backend.
pub struct CompressedBackend;

fn find_hook(config: &MxConfig, path: &str) -> Result<CompressHook> {
    config
        .find_compress_hook(path)
        .ok_or_else(|| Error::FindHookError(path.to_owned()))
}

fn plain_path_for(path: &str) -> PathBuf {
    let name = Path::new(path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    env::temp_dir().join(format!("mailbox-lib-{}-{}", Uuid::new_v4(), name))
}

/// Runs the open command of the hook, writing the plain copy. The
/// copy gets the modification time of the compressed file so that
/// later writes can be detected.
fn decompress(hook: &CompressHook, compressed: &str, plain: &Path) -> Result<Option<Snapshot>> {
    let plain_str = plain.to_string_lossy();
    let cmd = CompressHook::expand(&hook.open_cmd, compressed, &plain_str);
    process::run(&cmd, &[]).map_err(|err| Error::DecompressError(err, compressed.to_owned()))?;

    let meta = Path::new(compressed).metadata().ok();
    if let Some(modified) = meta.as_ref().and_then(|meta| meta.modified().ok()) {
        fs::File::open(plain)
            .and_then(|file| file.set_times(FileTimes::new().set_modified(modified)))
            .map_err(|err| Error::SetTimesError(err, plain.to_owned()))?;
    }

    Ok(Snapshot::of(Path::new(compressed)))
}

fn compress(cmd: &str, compressed: &str, plain: &Path) -> Result<()> {
    let cmd = CompressHook::expand(cmd, compressed, &plain.to_string_lossy());
    process::run(&cmd, &[]).map_err(|err| Error::CompressError(err, compressed.to_owned()))?;
    Ok(())
}

/// Tells if the plain copy was written since it was made.
fn plain_changed(mailbox: &Mailbox) -> bool {
    let plain = match &mailbox.plain_path {
        Some(plain) => Snapshot::of(plain),
        None => return false,
    };
    match (plain, mailbox.source) {
        (Some(plain), Some(source)) => plain.mtime != source.mtime,
        (Some(plain), None) => plain.size > 0,
        (None, _) => false,
    }
}

/// Tells if new messages are appended to the compressed file as is,
/// without decompressing it first.
fn appends_in_place(mailbox: &Mailbox, hook: &CompressHook) -> bool {
    mailbox.is_append_only() && hook.append_cmd.is_some() && mailbox.source.is_some()
}

/// Picks the flat file backend matching the content of the plain copy.
fn delegate(config: &MxConfig, mailbox: &Mailbox) -> &'static MboxBackend {
    let plain = match &mailbox.plain_path {
        Some(plain) => plain,
        None => return MboxBackend::for_kind(config.mbox_type),
    };
    let meta = plain.metadata().ok();
    let empty = meta.as_ref().map(|meta| meta.len() == 0).unwrap_or(true);
    if empty {
        return MboxBackend::for_kind(config.mbox_type);
    }
    let plain = plain.to_string_lossy();
    if MboxBackend::MMDF.path_probe(&plain, meta.as_ref()) == MailboxType::Mmdf {
        &MboxBackend::MMDF
    } else {
        &MboxBackend::MBOX
    }
}

impl CompressedBackend {
    /// Writes the plain copy back, then makes it look untouched again.
    fn recompress(&self, ctx: &mut Context) -> backend::Result<()> {
        let plain = match ctx.mailbox.plain_path.clone() {
            Some(plain) => plain,
            None => return Ok(()),
        };
        if !plain_changed(ctx.mailbox) {
            return Ok(());
        }

        let hook = find_hook(ctx.config, &ctx.mailbox.path)?;
        let plain_empty = plain.metadata().map(|meta| meta.len() == 0).unwrap_or(true);
        if appends_in_place(ctx.mailbox, &hook) && plain_empty {
            return Ok(());
        }
        match &hook.append_cmd {
            Some(cmd) if appends_in_place(ctx.mailbox, &hook) => {
                debug!("appending plain copy {:?} to {}", plain, ctx.mailbox.path);
                compress(cmd, &ctx.mailbox.path, &plain)?;
                // the appended messages now live in the compressed file
                fs::File::create(&plain).map_err(|err| Error::CreatePlainError(err, plain.clone()))?;
            }
            _ => {
                debug!("compressing plain copy {:?} into {}", plain, ctx.mailbox.path);
                compress(&hook.close_cmd, &ctx.mailbox.path, &plain)?;
            }
        }

        ctx.mailbox.source = Snapshot::of(Path::new(&ctx.mailbox.path));
        if let Some(modified) = ctx.mailbox.source.and_then(|source| source.mtime) {
            fs::File::open(&plain)
                .and_then(|file| file.set_times(FileTimes::new().set_modified(modified)))
                .map_err(|err| Error::SetTimesError(err, plain.clone()))?;
        }
        ctx.mailbox.snapshot = Snapshot::of(&plain);
        Ok(())
    }

    fn remove_plain(mailbox: &mut Mailbox) -> Result<()> {
        if let Some(plain) = mailbox.plain_path.take() {
            debug!("removing plain copy {:?}", plain);
            if plain.exists() {
                fs::remove_file(&plain).map_err(|err| Error::RemovePlainError(err, plain))?;
            }
        }
        mailbox.source = None;
        Ok(())
    }
}

impl Backend for CompressedBackend {
    fn kind(&self) -> MailboxType {
        MailboxType::Compressed
    }

    fn is_local(&self) -> bool {
        true
    }

    fn mbox_open(&self, ctx: &mut Context) -> backend::Result<OpenStatus> {
        let hook = find_hook(ctx.config, &ctx.mailbox.path)?;
        let plain = plain_path_for(&ctx.mailbox.path);
        debug!("opening compressed mailbox {} through {:?}", ctx.mailbox.path, plain);

        if Path::new(&ctx.mailbox.path).exists() {
            ctx.mailbox.source = decompress(&hook, &ctx.mailbox.path, &plain)?;
        }
        ctx.mailbox.plain_path = Some(plain);

        let status = delegate(ctx.config, ctx.mailbox).mbox_open(ctx);
        if !matches!(status, Ok(OpenStatus::Ok)) {
            Self::remove_plain(ctx.mailbox)?;
        }
        status
    }

    fn mbox_open_append(&self, ctx: &mut Context, flags: OpenFlags) -> backend::Result<()> {
        let hook = find_hook(ctx.config, &ctx.mailbox.path)?;
        let plain = plain_path_for(&ctx.mailbox.path);
        let exists = Path::new(&ctx.mailbox.path).exists();
        debug!("opening compressed mailbox {} for appending", ctx.mailbox.path);

        if exists && !flags.contains(OpenFlags::NEW_FOLDER) {
            if hook.append_cmd.is_some() {
                fs::File::create(&plain).map_err(|err| Error::CreatePlainError(err, plain.clone()))?;
                ctx.mailbox.source = Snapshot::of(Path::new(&ctx.mailbox.path));
            } else {
                ctx.mailbox.source = decompress(&hook, &ctx.mailbox.path, &plain)?;
            }
        }
        ctx.mailbox.plain_path = Some(plain);

        let result = delegate(ctx.config, ctx.mailbox).mbox_open_append(ctx, flags);
        if result.is_err() {
            Self::remove_plain(ctx.mailbox)?;
        }
        result
    }

    fn mbox_check(&self, ctx: &mut Context) -> backend::Result<CheckStatus> {
        let current = Snapshot::of(Path::new(&ctx.mailbox.path));
        if current != ctx.mailbox.source {
            if let Some(plain) = ctx.mailbox.plain_path.clone() {
                debug!("compressed mailbox {} changed, decompressing again", ctx.mailbox.path);
                let hook = find_hook(ctx.config, &ctx.mailbox.path)?;
                ctx.mailbox.source = decompress(&hook, &ctx.mailbox.path, &plain)?;
            }
        }
        delegate(ctx.config, ctx.mailbox).mbox_check(ctx)
    }

    fn mbox_check_stats(
        &self,
        ctx: &mut Context,
        flags: CheckStatsFlags,
    ) -> backend::Result<CheckStatsStatus> {
        if ctx.mailbox.plain_path.is_some() {
            return delegate(ctx.config, ctx.mailbox).mbox_check_stats(ctx, flags);
        }

        // closed mailbox: work on a throwaway copy
        let hook = find_hook(ctx.config, &ctx.mailbox.path)?;
        let plain = plain_path_for(&ctx.mailbox.path);
        ctx.mailbox.source = decompress(&hook, &ctx.mailbox.path, &plain)?;
        ctx.mailbox.plain_path = Some(plain);
        let status = delegate(ctx.config, ctx.mailbox).mbox_check_stats(ctx, flags | CheckStatsFlags::FORCE);
        Self::remove_plain(ctx.mailbox)?;
        status
    }

    fn mbox_sync(&self, ctx: &mut Context) -> backend::Result<CheckStatus> {
        let status = delegate(ctx.config, ctx.mailbox).mbox_sync(ctx)?;
        self.recompress(ctx)?;
        Ok(status)
    }

    fn mbox_close(&self, ctx: &mut Context) -> backend::Result<()> {
        delegate(ctx.config, ctx.mailbox).mbox_close(ctx)?;
        if !ctx.mailbox.is_read_only() {
            self.recompress(ctx)?;
        } else if plain_changed(ctx.mailbox) {
            warn!("read-only compressed mailbox {} changed, changes discarded", ctx.mailbox.path);
        }
        Self::remove_plain(ctx.mailbox)?;

        if !ctx.mailbox.is_quiet() {
            info!("compressed mailbox {} closed", ctx.mailbox.path);
        }
        Ok(())
    }

    fn msg_open(&self, ctx: &mut Context, index: usize) -> backend::Result<Message> {
        delegate(ctx.config, ctx.mailbox).msg_open(ctx, index)
    }

    fn msg_open_new(
        &self,
        ctx: &mut Context,
        email: &Email,
        flags: MsgOpenFlags,
    ) -> backend::Result<Message> {
        delegate(ctx.config, ctx.mailbox).msg_open_new(ctx, email, flags)
    }

    fn msg_commit(&self, ctx: &mut Context, msg: &mut Message) -> backend::Result<()> {
        delegate(ctx.config, ctx.mailbox).msg_commit(ctx, msg)
    }

    fn msg_padding_size(&self, mailbox: &Mailbox) -> usize {
        match &mailbox.plain_path {
            Some(plain) => {
                let meta = plain.metadata().ok();
                let kind = MboxBackend::MMDF.path_probe(&plain.to_string_lossy(), meta.as_ref());
                MboxBackend::for_kind(kind).msg_padding_size(mailbox)
            }
            None => MboxBackend::MBOX.msg_padding_size(mailbox),
        }
    }

    /// Claims regular files carrying one of the built-in compression
    /// suffixes.
    fn path_probe(&self, path: &str, meta: Option<&fs::Metadata>) -> MailboxType {
        match meta {
            Some(meta) if meta.is_file() => (),
            _ => return MailboxType::Unknown,
        }
        if default_compress_hooks().iter().any(|hook| hook.matches(path)) {
            MailboxType::Compressed
        } else {
            MailboxType::Unknown
        }
    }

    fn path_canon(&self, path: String) -> backend::Result<String> {
        path::canon(path)
    }

    fn path_pretty(&self, path: String, folder: &str) -> backend::Result<String> {
        Ok(path::pretty(path, folder))
    }

    fn path_parent(&self, path: String) -> backend::Result<String> {
        path::parent(path)
    }

    fn path_is_empty(&self, path: &str) -> backend::Result<bool> {
        let hook = default_compress_hooks()
            .into_iter()
            .find(|hook| hook.matches(path))
            .ok_or_else(|| Error::FindHookError(path.to_owned()))?;
        let plain = plain_path_for(path);
        decompress(&hook, path, &plain)?;
        let empty = plain.metadata().map(|meta| meta.len() == 0).unwrap_or(true);
        if let Err(err) = fs::remove_file(&plain) {
            warn!("cannot remove plain copy {:?}: {}", plain, err);
        }
        Ok(empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_copy_keeps_stem() {
        let plain = plain_path_for("/mail/archive.gz");
        assert!(plain.starts_with(env::temp_dir()));
        assert!(plain.to_string_lossy().ends_with("-archive"));
    }

    #[cfg(unix)]
    #[test]
    fn probe_by_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let gz = dir.path().join("box.gz");
        fs::write(&gz, b"").unwrap();
        let meta = gz.metadata().unwrap();
        let backend = CompressedBackend;
        assert_eq!(
            MailboxType::Compressed,
            backend.path_probe(&gz.to_string_lossy(), Some(&meta))
        );
        assert_eq!(
            MailboxType::Unknown,
            backend.path_probe(&dir.path().join("box").to_string_lossy(), Some(&meta))
        );
        assert_eq!(
            MailboxType::Unknown,
            backend.path_probe(&dir.path().to_string_lossy(), dir.path().metadata().ok().as_ref())
        );
    }
}
