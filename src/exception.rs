// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains exception and Result definitions
use thiserror::Error;

/// Represents all kind of errors which can occur while setting up or driving the servo loop.
///
/// Nothing inside a running servo cycle returns one of these. Faults during a cycle are reported
/// through the published [`StatusCode`](`crate::StatusCode`) instead.
#[derive(Error, Debug)]
pub enum ServoException {
    /// ConfigException is returned if the parameters are contradictory or out of range.
    #[error("Invalid servo parameter: {message}")]
    ConfigException { message: String },

    /// ParseException is returned if a parameter file cannot be parsed.
    #[error("Unable to parse servo parameters: {message}")]
    ParseException { message: String },

    /// IoException is returned if a parameter file cannot be read.
    #[error("Unable to read {path}: {source}")]
    IoException {
        path: String,
        source: std::io::Error,
    },

    /// NotInitializedException is returned if the loop is started before a joint state arrived.
    #[error("{message}")]
    NotInitializedException { message: String },

    /// RealTimeException is returned if the real-time priority cannot be set
    #[error("{message}")]
    RealTimeException { message: String },

    /// ThreadException is returned if the cycle thread cannot be spawned or joined.
    #[error("{message}")]
    ThreadException { message: String },
}

/// creates a ConfigException from a message
pub(crate) fn create_config_exception<S: Into<String>>(message: S) -> ServoException {
    ServoException::ConfigException {
        message: message.into(),
    }
}

/// Result type which can have ServoException as Error
pub type ServoResult<T> = Result<T, ServoException>;
