//! IPC transport abstraction

use async_trait::async_trait;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Server-side IPC transport trait
#[async_trait]
pub trait IpcTransport: Send + Sync {
    /// The stream type for this transport
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Bind to the configured address and start listening
    async fn bind(path: &Path) -> Result<Self>
    where
        Self: Sized;

    /// Accept an incoming connection
    async fn accept(&self) -> Result<Self::Stream>;

    /// Release the address (delete the socket file)
    async fn cleanup(&self) -> Result<()>;
}

/// Client-side IPC transport trait
#[async_trait]
pub trait IpcClientTransport: Send + Sync {
    /// The stream type for this transport
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Connect to the daemon at the given path
    async fn connect(path: &Path) -> Result<Self::Stream>;
}

pub use super::unix::{UnixIpcClient as PlatformClient, UnixIpcTransport as PlatformTransport};
