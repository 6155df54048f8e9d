//! Message ports and messages (spec section 3 "Exec objects").
//!
//! The message queue itself is kept host-side as a `VecDeque` rather than
//! walked as an in-RAM linked list: nothing outside our own trap handlers
//! ever traverses `mp_MsgList` directly (AmigaDOS handlers reach it only
//! through `PutMsg`/`GetMsg`/`WaitPort`, all of which are host traps), so
//! there is no correctness reason to pay for a faithful Exec-style
//! doubly-linked list. The struct header is still written into emulator RAM
//! so the port's address is a real, inspectable Amiga pointer.

use std::collections::{HashMap, VecDeque};

use crate::error::AmifuseError;
use crate::memory::Memory;

/// Layout of the Exec `Node` + `MsgPort` header actually written to RAM.
/// Kept minimal: nothing in this bridge reads these fields back out of RAM,
/// they exist so the port address is a legitimate pointer a handler can
/// store and pass back to us unchanged.
pub mod layout {
    pub const LN_NAME: u32 = 4; // pointer to a C string, or 0 if unnamed
    pub const MP_SIGBIT: u32 = 8;
    pub const MP_SIGTASK: u32 = 12;
    pub const SIZE: u32 = 16;
}

/// Layout of the `Message` header that precedes every `DosPacket` payload
/// in the heap (spec section 3: "Message: header ... plus payload").
pub mod message_layout {
    pub const MN_REPLYPORT: u32 = 0;
    pub const MN_LENGTH: u32 = 4;
    pub const HEADER_SIZE: u32 = 8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle(pub u32);

/// Host-side mirror of an Exec `MsgPort`: the queue of pending message
/// addresses plus the signal the owning task wakes on.
#[derive(Debug)]
pub struct MsgPort {
    pub addr: u32,
    pub name: Option<String>,
    pub queue: VecDeque<u32>,
    pub owner_task: Option<u32>,
}

/// An allocated `Message` + `DosPacket` pair, addressed by the message's
/// (not the packet's) emulator address.
#[derive(Debug, Clone, Copy)]
pub struct Message {
    pub addr: u32,
}

impl Message {
    /// Address of the `DosPacket` payload embedded after the message header.
    pub fn packet_addr(&self) -> u32 {
        self.addr + message_layout::HEADER_SIZE
    }
}

/// Registry of live ports, keyed by their emulator address (spec section 3:
/// "the bridge maintains a mapping from emulator-side MsgPort* pointer to a
/// host handle").
#[derive(Default)]
pub struct PortRegistry {
    ports: HashMap<u32, MsgPort>,
    by_name: HashMap<String, u32>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates and registers a new, unnamed port at a fresh RAM address.
    pub fn create(&mut self, mem: &mut Memory, name: Option<&str>, owner_task: Option<u32>) -> Result<PortHandle, AmifuseError> {
        let addr = mem.alloc(layout::SIZE, 4)?;
        mem.write_u32(addr + layout::MP_SIGTASK, owner_task.unwrap_or(0))?;
        if let Some(n) = name {
            self.by_name.insert(n.to_string(), addr);
        }
        self.ports.insert(
            addr,
            MsgPort {
                addr,
                name: name.map(str::to_string),
                queue: VecDeque::new(),
                owner_task,
            },
        );
        Ok(PortHandle(addr))
    }

    pub fn delete(&mut self, handle: PortHandle) {
        if let Some(port) = self.ports.remove(&handle.0) {
            if let Some(name) = port.name {
                self.by_name.remove(&name);
            }
        }
    }

    pub fn find_by_name(&self, name: &str) -> Option<PortHandle> {
        self.by_name.get(name).map(|a| PortHandle(*a))
    }

    pub fn get(&self, handle: PortHandle) -> Option<&MsgPort> {
        self.ports.get(&handle.0)
    }

    pub fn get_mut(&mut self, handle: PortHandle) -> Option<&mut MsgPort> {
        self.ports.get_mut(&handle.0)
    }

    /// `PutMsg`: enqueue FIFO, set the message's reply-port-owner marker.
    pub fn put_msg(&mut self, port: PortHandle, msg: MessageHandle) {
        if let Some(p) = self.ports.get_mut(&port.0) {
            p.queue.push_back(msg.0);
        }
    }

    /// `GetMsg`: dequeue or `None`.
    pub fn get_msg(&mut self, port: PortHandle) -> Option<MessageHandle> {
        self.ports.get_mut(&port.0).and_then(|p| p.queue.pop_front()).map(MessageHandle)
    }

    pub fn is_empty(&self, port: PortHandle) -> bool {
        self.ports.get(&port.0).map(|p| p.queue.is_empty()).unwrap_or(true)
    }

    /// Allocates a `Message` + `DosPacket` block in the heap.
    pub fn alloc_message(&self, mem: &mut Memory) -> Result<Message, AmifuseError> {
        let total = message_layout::HEADER_SIZE + crate::dospacket::layout::SIZE;
        let addr = mem.alloc(total, 4)?;
        Ok(Message { addr })
    }

    pub fn free_message(&self, mem: &mut Memory, msg: Message) {
        let total = message_layout::HEADER_SIZE + crate::dospacket::layout::SIZE;
        mem.free(msg.addr, total, 4);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ArenaLayout;

    fn mem() -> Memory {
        let layout = ArenaLayout {
            code_base: 0,
            code_size: 0x1000,
            kernel_base: 0x1000,
            kernel_size: 0x1000,
            heap_base: 0x2000,
            heap_size: 0x4000,
        };
        Memory::new(0x8000, layout)
    }

    #[test]
    fn put_then_get_is_fifo() {
        let mut m = mem();
        let mut reg = PortRegistry::new();
        let port = reg.create(&mut m, Some("PFS3"), None).unwrap();
        let m1 = reg.alloc_message(&mut m).unwrap();
        let m2 = reg.alloc_message(&mut m).unwrap();
        reg.put_msg(port, MessageHandle(m1.addr));
        reg.put_msg(port, MessageHandle(m2.addr));
        assert_eq!(reg.get_msg(port), Some(MessageHandle(m1.addr)));
        assert_eq!(reg.get_msg(port), Some(MessageHandle(m2.addr)));
        assert_eq!(reg.get_msg(port), None);
    }

    #[test]
    fn find_port_by_name() {
        let mut m = mem();
        let mut reg = PortRegistry::new();
        let port = reg.create(&mut m, Some("PFS3"), None).unwrap();
        assert_eq!(reg.find_by_name("PFS3"), Some(port));
        assert_eq!(reg.find_by_name("nope"), None);
    }
}
