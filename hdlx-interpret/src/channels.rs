#![forbid(unsafe_code)]

use std::collections::VecDeque;

use hdlx_core::{ChannelHandle, ConcreteType, InterpValue, ValueError};

#[derive(Debug)]
struct ChannelEntry {
    name: String,
    payload: ConcreteType,
    /// `None` is unbounded.
    depth: Option<u64>,
    queue: VecDeque<InterpValue>,
}

/// FIFO queues shared by every proc in a network, addressed by handle.
#[derive(Debug, Default)]
pub struct Channels {
    entries: Vec<ChannelEntry>,
    /// Bumped on every successful send or receive.
    activity: u64,
}

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, name: impl Into<String>, payload: ConcreteType, depth: Option<u64>) -> ChannelHandle {
        let handle = ChannelHandle(self.entries.len() as u32);
        self.entries.push(ChannelEntry {
            name: name.into(),
            payload,
            depth,
            queue: VecDeque::new(),
        });
        handle
    }

    fn entry(&self, h: ChannelHandle) -> Result<&ChannelEntry, ValueError> {
        self.entries
            .get(h.0 as usize)
            .ok_or_else(|| ValueError::new(format!("unknown channel#{}", h.0)))
    }

    fn entry_mut(&mut self, h: ChannelHandle) -> Result<&mut ChannelEntry, ValueError> {
        self.entries
            .get_mut(h.0 as usize)
            .ok_or_else(|| ValueError::new(format!("unknown channel#{}", h.0)))
    }

    /// Whether a send would be accepted now.
    pub fn has_room(&self, h: ChannelHandle) -> Result<bool, ValueError> {
        let e = self.entry(h)?;
        Ok(match e.depth {
            Some(d) => (e.queue.len() as u64) < d.max(1),
            None => true,
        })
    }

    pub fn send(&mut self, h: ChannelHandle, value: InterpValue) -> Result<(), ValueError> {
        if !self.has_room(h)? {
            return Err(ValueError::new(format!("channel#{} is full", h.0)));
        }
        self.entry_mut(h)?.queue.push_back(value);
        self.activity += 1;
        Ok(())
    }

    pub fn pop(&mut self, h: ChannelHandle) -> Result<Option<InterpValue>, ValueError> {
        let v = self.entry_mut(h)?.queue.pop_front();
        if v.is_some() {
            self.activity += 1;
        }
        Ok(v)
    }

    pub fn is_empty(&self, h: ChannelHandle) -> bool {
        self.entry(h).map(|e| e.queue.is_empty()).unwrap_or(true)
    }

    pub fn len(&self, h: ChannelHandle) -> usize {
        self.entry(h).map(|e| e.queue.len()).unwrap_or(0)
    }

    pub fn name(&self, h: ChannelHandle) -> &str {
        self.entry(h).map(|e| e.name.as_str()).unwrap_or("?")
    }

    pub fn payload(&self, h: ChannelHandle) -> Option<&ConcreteType> {
        self.entry(h).ok().map(|e| &e.payload)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn activity(&self) -> u64 {
        self.activity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_channels_refuse_sends_when_full() {
        let mut ch = Channels::new();
        let h = ch.create("c", ConcreteType::ubits(8), Some(1));
        assert!(ch.has_room(h).unwrap());
        ch.send(h, InterpValue::ubits(8, 1)).unwrap();
        assert!(!ch.has_room(h).unwrap());
        assert!(ch.send(h, InterpValue::ubits(8, 2)).is_err());
        assert_eq!(ch.pop(h).unwrap(), Some(InterpValue::ubits(8, 1)));
        assert_eq!(ch.pop(h).unwrap(), None);
        assert_eq!(ch.activity(), 2);
    }

    #[test]
    fn unbounded_channels_keep_fifo_order() {
        let mut ch = Channels::new();
        let h = ch.create("c", ConcreteType::ubits(32), None);
        for i in 0..4 {
            ch.send(h, InterpValue::u32(i)).unwrap();
        }
        assert_eq!(ch.len(h), 4);
        assert_eq!(ch.pop(h).unwrap(), Some(InterpValue::u32(0)));
        assert!(ch.pop(ChannelHandle(9)).is_err());
    }
}
