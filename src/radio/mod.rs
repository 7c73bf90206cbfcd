pub mod traits;

pub use traits::{ChannelInfo, RadioLink};
