pub mod conversations;
pub mod exchanges;
pub mod festivals;
pub mod interests;
pub mod users;

pub use conversations::{pair_key, Conversation};
pub use exchanges::{DestroyReason, Exchange, ExchangeStatus, ExchangeView, NewExchange};
pub use festivals::{Festival, FestivalStats, NewFestival, RoomMember};
pub use interests::{AddEdgeOutcome, Counterpart, RemoveEdgeOutcome};
pub use users::{Gender, LookingFor, NearbyFilter, NearbyUser, NewUser, User};
