//! Remote execution failures

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The session could not be established (auth, host key, DNS, refused)
    #[error("remote client not ready for {host}: {message}")]
    ClientNotReady { host: String, message: String },

    /// An established session failed mid-operation
    #[error("transport failure talking to {host}: {message}")]
    Transport { host: String, message: String },

    /// A transfer or existence check exited non-zero
    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("local I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl RemoteError {
    pub fn not_ready(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ClientNotReady { host: host.into(), message: message.into() }
    }

    pub fn transport(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport { host: host.into(), message: message.into() }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }
}
