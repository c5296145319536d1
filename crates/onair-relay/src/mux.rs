//! Muxer pipe: a named FIFO held open for the relay's lifetime.
//!
//! The FIFO is opened O_RDWR once at startup and never closed, so the
//! transcoder reading it never sees EOF while pumps come and go. A single
//! writer task drains the bounded stream channel into the pipe; chunks are
//! never split, so transport packets from different pumps cannot
//! interleave.

use std::ffi::CString;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use tokio::sync::mpsc;

/// Create the FIFO (replacing any stale file) and open it for both read
/// and write. Failure here is an invariant violation: the relay cannot
/// run without its pipe, so the caller aborts the process.
pub fn create_and_hold_pipe(path: &Path) -> anyhow::Result<std::fs::File> {
    let _ = std::fs::remove_file(path);

    let c_path = CString::new(path.as_os_str().as_encoded_bytes())
        .context("pipe path contains a NUL byte")?;
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o666) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error()).context("mkfifo failed");
    }

    // O_RDWR on a FIFO never blocks and keeps a reader alive across
    // writer transitions.
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .context("failed to hold pipe open")?;

    tracing::info!(path = %path.display(), "pipe held open for persistent connection");
    Ok(file)
}

/// Drain the stream channel into the pipe. Runs on its own writer thread
/// (`spawn_blocking`) until every sender is dropped at process shutdown.
/// Chunks are written whole, never split.
pub fn pipe_writer_loop(mut pipe: std::fs::File, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(chunk) = rx.blocking_recv() {
        if let Err(e) = pipe.write_all(&chunk) {
            tracing::error!(error = %e, "pipe write error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn creates_fifo_and_replaces_stale_file() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("onair-mux-test-{}.pipe", std::process::id()));

        // Pre-existing regular file must not break FIFO creation.
        std::fs::write(&path, b"stale").unwrap();
        let file = create_and_hold_pipe(&path).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        use std::os::unix::fs::FileTypeExt;
        assert!(meta.file_type().is_fifo());

        drop(file);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn writer_drains_chunks_in_order() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("onair-mux-order-{}.pipe", std::process::id()));
        let pipe = create_and_hold_pipe(&path).unwrap();

        // Second O_RDWR handle to read what the writer produces.
        let mut reader = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();

        let (tx, rx) = mpsc::channel(4);
        let writer = tokio::task::spawn_blocking(move || pipe_writer_loop(pipe, rx));

        tx.send(b"one".to_vec()).await.unwrap();
        tx.send(b"two".to_vec()).await.unwrap();
        drop(tx);
        writer.await.unwrap();

        let mut buf = [0u8; 6];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"onetwo");

        let _ = std::fs::remove_file(&path);
    }
}
