//! Byte stream helpers.

use {
    crate::io_err,
    tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
};

/// Copy `src` into `dst` through `buf` until `src` reports end of input.
///
/// Sources that fill only part of `buf` per call are fine; every byte read is
/// written out before the next read. Returns the number of bytes copied.
pub async fn copy_buffer<R, W>(src: &mut R, dst: &mut W, buf: &mut [u8]) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    if buf.is_empty() {
        return Err(io_err!(InvalidInput, "empty copy buffer"));
    }

    let mut total = 0u64;
    loop {
        let n = match src.read(buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        dst.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    dst.flush().await?;
    Ok(total)
}
