use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::MessageWriter;
use super::SinkMessage;
use crate::Result;
use crate::SinkError;

/// Writes each payload followed by a newline. Concurrent writers are
/// serialized so lines never interleave.
pub struct LineWriter<O> {
    destination: &'static str,
    out: Mutex<O>,
}

impl LineWriter<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new("stdout", tokio::io::stdout())
    }
}

impl<O> LineWriter<O> {
    pub fn new(
        destination: &'static str,
        out: O,
    ) -> Self {
        Self {
            destination,
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> O {
        self.out.into_inner()
    }
}

#[async_trait]
impl<O> MessageWriter for LineWriter<O>
where
    O: AsyncWrite + Unpin + Send + 'static,
{
    fn destination(&self) -> String {
        self.destination.to_string()
    }

    async fn write(
        &self,
        message: &SinkMessage,
    ) -> Result<()> {
        let mut out = self.out.lock().await;
        out.write_all(&message.payload).await.map_err(SinkError::from)?;
        out.write_all(b"\n").await.map_err(SinkError::from)?;
        out.flush().await.map_err(SinkError::from)?;
        Ok(())
    }
}
