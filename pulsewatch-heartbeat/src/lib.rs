/**
 * PULSEWATCH HEARTBEAT - Protocole commun à tous les composants
 *
 * RÔLE :
 * - Message `Heartbeat` : codec JSON et validation
 * - Codec de durées compatible nanosecondes
 * - Helpers de topics (préfixe, filtres d'abonnement)
 * - `Publisher` : horodate, valide et publie des heartbeats retenus
 */

pub mod duration;
mod error;
pub mod message;
pub mod publisher;
pub mod topic;

pub use error::{MessageError, PublishError};
pub use message::Heartbeat;
pub use publisher::{local_hostname, HeartbeatSink, Publisher};
pub use topic::{normalize_prefix, subscription_filter, topic_for};
