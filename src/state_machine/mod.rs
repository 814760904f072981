mod status;
mod transmutation;

pub use status::{StateMachine, Transition, TransmutationStatus};
pub use transmutation::{AuditAction, AuditRecord, EntityKind, NewTransmutation, Transmutation};
