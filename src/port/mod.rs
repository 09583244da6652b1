//! Host port reservation
//!
//! This module learns free host ports before a container exists and holds
//! them until the container runtime is about to bind them.

pub mod binding;
pub mod reservation;

pub use binding::{HostBinding, PortBindingSet, PortRequest, Transport, DEFAULT_HOST_IP};
pub use reservation::{Listener, PortReservation, ReservedPort};
