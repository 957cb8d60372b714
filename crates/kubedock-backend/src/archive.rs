// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tar streaming of host folders into exec stdin.

use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use kubedock_k8s::ExecStdin;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tracing::warn;

const CHUNK_SIZE: usize = 32 * 1024;

/// Write a tar archive of the contents of `src` to `writer`.
///
/// Entry paths are relative to `src`, so extracting with `-C <dst>` puts the
/// folder contents directly under `dst`.
pub fn pack_folder<W: Write>(src: &Path, writer: W) -> io::Result<W> {
	let mut builder = tar::Builder::new(writer);
	builder.follow_symlinks(false);
	builder.append_dir_all("", src)?;
	builder.into_inner()
}

/// Sends every written chunk through a single-slot channel.
struct ChannelWriter {
	tx: mpsc::Sender<io::Result<Bytes>>,
}

impl Write for ChannelWriter {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self
			.tx
			.blocking_send(Ok(Bytes::copy_from_slice(buf)))
			.map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive reader closed"))?;
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

/// Stream a tar archive of `src` as an async reader.
///
/// The archive is produced on the blocking pool while the returned reader is
/// consumed, with at most one chunk in flight. Producer errors surface as
/// read errors.
pub fn folder_reader(src: PathBuf) -> ExecStdin {
	let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(1);

	tokio::task::spawn_blocking(move || {
		let writer = BufWriter::with_capacity(
			CHUNK_SIZE,
			ChannelWriter { tx: tx.clone() },
		);
		let result = pack_folder(&src, writer).and_then(|mut w| w.flush());
		if let Err(e) = result {
			warn!(path = %src.display(), error = %e, "Error during tar");
			let _ = tx.blocking_send(Err(e));
		}
	});

	let chunks = futures::stream::unfold(rx, |mut rx| async move {
		rx.recv().await.map(|chunk| (chunk, rx))
	});
	Box::pin(StreamReader::new(chunks))
}
