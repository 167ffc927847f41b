// Presence, messaging and safety coordination engine for an off-grid radio mesh.

pub mod announcements;
pub mod auth;
pub mod checkin;
pub mod clock;
pub mod config;
pub mod delivery;
pub mod emergency;
pub mod engine;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod presence;
pub mod transport;

pub use announcements::AnnouncementBoard;
pub use auth::{Authorizer, RoleAuthorizer};
pub use checkin::{CheckInInterval, CheckInScheduler};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DeliveryPolicy, EngineConfig, PresenceWindows};
pub use emergency::{EmergencyController, EmergencyState};
pub use engine::{MeshEngine, MeshEngineBuilder};
pub use error::{EngineError, Result};
pub use events::EngineEvent;
pub use pipeline::MessageLog;
pub use presence::{connection_status, LinkTelemetry, MemberView, PresenceTracker};
pub use transport::{LoopbackMesh, SendOutcome, TransportCommand, TransportHandle, TransportNotification};
