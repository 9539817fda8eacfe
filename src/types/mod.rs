//! Shared types for labdesk

pub mod booking;
pub mod error;
pub mod lab;
pub mod reservation;
pub mod subject;

pub use booking::Booking;
pub use error::{BackendError, BackendResult, PipelineError, Result};
pub use lab::{Lab, LabDetails, LabMetadata, LabOwner};
pub use reservation::{RawStatus, RecordLookup, Reservation, ReservationKey, StatusCategory};
pub use subject::{is_wallet_address, is_zero_address, IdentityMode, LabId, Subject};
