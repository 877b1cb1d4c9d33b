mod deserialize;
mod inbox;
pub mod msg;
pub mod packet;
mod receiver;
mod registry;
mod sender;
mod serialize;
pub mod unit;

use tokio::io::{AsyncRead, AsyncWrite};

pub use deserialize::Deserialize;
pub use inbox::Inbox;
pub use receiver::OnoReceiver;
pub use registry::UnitRegistry;
pub use sender::OnoSender;
pub use serialize::Serialize;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Largest frame a receiver accepts unless told otherwise.
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// Creates both `OnoReceiver` and `OnoSender` network channel parts.
///
/// Given a writer and reader creates and returns both ends of the communication.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// A communication stream in the form of an ono receiver and sender.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}
