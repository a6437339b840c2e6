//! Domain errors returned by the dispatch services

use crate::{
    models::{RideId, RideStatus, Role, UserId},
    ports::StoreError,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    /// The user is unknown or lacks the role the operation needs
    #[error("user {user_id} is not registered for this action")]
    NotRegistered { user_id: UserId },

    #[error("role {role} is not allowed for this user")]
    RoleNotAllowed { role: Role },

    #[error("role cannot change while ride {ride_id} is open")]
    RoleChangeBlocked { ride_id: RideId },

    #[error("location is not a valid coordinate pair")]
    InvalidLocation,

    #[error("ride {ride_id} not found")]
    RideNotFound { ride_id: RideId },

    /// The ride already left the state the operation expects
    #[error("ride {ride_id} is {status}")]
    RideNotPending { ride_id: RideId, status: RideStatus },

    #[error("user is not a party to ride {ride_id}")]
    NotRideOwner { ride_id: RideId },

    #[error("cannot move ride from {from} to {to}")]
    InvalidTransition { from: RideStatus, to: RideStatus },

    #[error("no open ride")]
    NoOpenRide,

    #[error("ride {ride_id} is still open")]
    OpenRideExists { ride_id: RideId },

    #[error("driver already serves ride {ride_id}")]
    DriverBusy { ride_id: RideId },

    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    #[error("ride {ride_id} has not been completed")]
    RideNotCompleted { ride_id: RideId },

    #[error("ride {ride_id} was already rated")]
    AlreadyRated { ride_id: RideId },

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
