use core::fmt;
use std::{
    error::Error,
    fmt::{Debug, Display, Formatter},
};

pub struct SetupError(pub Box<dyn Error>);

impl Debug for SetupError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\r\x1b[K{}", self)
    }
}

impl Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[31mERROR\x1b[0m: {}", self.0)
    }
}

impl Error for SetupError {}

#[derive(Debug)]
struct Message(String);

impl Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for Message {}

impl From<std::io::Error> for SetupError {
    fn from(e: std::io::Error) -> Self {
        SetupError(Box::new(e))
    }
}

impl From<std::net::AddrParseError> for SetupError {
    fn from(e: std::net::AddrParseError) -> Self {
        SetupError(Box::new(e))
    }
}

impl From<String> for SetupError {
    fn from(s: String) -> Self {
        SetupError(Box::new(Message(s)))
    }
}

impl From<&str> for SetupError {
    fn from(s: &str) -> Self {
        SetupError(Box::new(Message(s.to_string())))
    }
}

pub type Result<T> = std::result::Result<T, SetupError>;
