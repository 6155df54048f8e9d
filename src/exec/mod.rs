//! Virtual Exec Kernel (spec component C2): the subset of AmigaOS Exec that
//! AmigaDOS handlers actually call — message ports, messages, tasks, and
//! the trap-dispatched library vectors that expose them.
//!
//! The task model is cooperative and, per spec section 4.2, trivial: the
//! only tasks are the bootstrap task and the handler itself, so scheduling
//! never has to choose among more than one runnable task.

pub mod library;
pub mod port;
pub mod task;

pub use library::{dispatch, ExecCall};
pub use port::{Message, MsgPort, PortRegistry};
pub use task::{Task, TaskState};
