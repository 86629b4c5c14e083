/*!
 * Wait/Notify Building Blocks
 *
 * The blocking capability the primitives are built on:
 * - `Parker`: one-shot wake flag parked through parking_lot_core
 * - `Semaphore`: counting semaphore with FIFO/LIFO queuing and direct hand-off
 * - `NotifyList`: ticket-ordered wait list used by `Cond`
 */

mod notify;
mod parker;
mod semaphore;

pub(crate) use notify::NotifyList;
pub use semaphore::{QueueMode, Semaphore};
