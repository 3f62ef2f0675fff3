use std::time::Duration;

use thiserror::Error;

use crate::types::{ConvoyId, UserId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvoyError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown convoy: {0}")]
    UnknownConvoy(ConvoyId),

    #[error("User {user_id} is not a member of convoy {convoy_id}")]
    NotAMember { convoy_id: ConvoyId, user_id: UserId },

    #[error("Address not found: {0}")]
    AddressNotFound(String),

    #[error("Address lookup timed out after {0:?}")]
    AddressLookupTimeout(Duration),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ConvoyError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Stable machine-readable code for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::UnknownConvoy(_) => "unknown_convoy",
            Self::NotAMember { .. } => "not_a_member",
            Self::AddressNotFound(_) => "address_not_found",
            Self::AddressLookupTimeout(_) => "address_lookup_timeout",
            Self::ServiceUnavailable(_) => "service_unavailable",
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvoyError>;
