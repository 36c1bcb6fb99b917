pub mod delivery;
pub mod policy;

pub use delivery::{dispatch, AlertDelivery, ChannelDelivery, LogDelivery, SpeechDelivery};
pub use policy::{AlertDecision, AlertPolicy, AlertPolicyConfig, NAG_MESSAGES};
