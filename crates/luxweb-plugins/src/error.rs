//! Typed errors for the plugin sub-system.
//!
//! Every variant is surfaced synchronously to the registering caller and
//! logged; none of them may terminate the process.

use thiserror::Error;

/// Registration-time and capability-misuse errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PluginError {
    /// `begin` was called a second time in the same initializer.
    #[error("cannot begin the plugin initialization twice")]
    BeginTwice,

    /// Plugin name is empty or contains characters outside `[a-z0-9_-]`
    /// (after case folding).
    #[error("plugin name must only be letters, numbers or element {{ -, _ }}: got '{0}'")]
    InvalidName(String),

    /// Another plugin already owns this name.
    #[error("plugin '{0}' already registered")]
    DuplicateName(String),

    /// A capability method was called before `begin`.
    #[error("plugin needs to say hello by calling begin() with a valid name first")]
    NotBegun,

    /// A capability method was called after the plugin's name was locked.
    #[error("cannot change plugin registration information after initialization")]
    Locked,

    /// The fully-qualified socket command name is already registered.
    #[error("command '{0}' already declared")]
    DuplicateCommand(String),

    /// The HTTP method is not in the recognized set (or is `use`).
    #[error("HTTP method not allowed: {0}")]
    MethodNotAllowed(String),

    /// The frontend asset is neither a script (`.js`) nor a style (`.css`).
    #[error("frontend files must be .js or .css files: got '{0}'")]
    AssetKind(String),

    /// The frontend asset does not exist on disk.
    #[error("frontend file was not found at '{0}'")]
    AssetMissing(String),

    /// The plugin attempted an operation outside its granted permission set.
    #[error("forbidden plugin SQL access")]
    Forbidden,

    /// Scoped configuration section could not be linked.
    #[error("plugin configuration error: {0}")]
    Config(String),

    /// Catch-all for initializer-raised failures.
    #[error("{0}")]
    Init(String),
}
