use std::any::TypeId;
use std::collections::HashMap;

/// Implemented by application types that want to become [`crate::message::Message`]s
/// without hand-assembling headers and a stream key every call site.
///
/// This is sugar on top of [`crate::message::Message`], not a new component: nothing
/// in the outbox writer, storage, bus, forwarder or WAL listener depends on it.
pub trait Event {
    fn get_headers(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    fn get_key(&self) -> String;
}

/// Maps a concrete `Event` type to the stream name it publishes under.
///
/// Rust has no runtime reflection equivalent to a type-keyed registry built
/// from `reflect.TypeOf`, so registration is explicit: callers register each
/// `Event` implementor's `TypeId` once at startup.
#[derive(Debug, Default)]
pub struct EventRegistry {
    streams: HashMap<TypeId, String>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: Event + 'static>(&mut self, stream_name: impl Into<String>) {
        self.streams.insert(TypeId::of::<E>(), stream_name.into());
    }

    pub fn stream_for<E: Event + 'static>(&self) -> Option<&str> {
        self.streams.get(&TypeId::of::<E>()).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OrderPlaced {
        order_id: String,
    }

    impl Event for OrderPlaced {
        fn get_key(&self) -> String {
            self.order_id.clone()
        }
    }

    #[test]
    fn registers_and_resolves_stream_name() {
        let mut registry = EventRegistry::new();
        registry.register::<OrderPlaced>("orders.placed");

        assert_eq!(registry.stream_for::<OrderPlaced>(), Some("orders.placed"));
    }

    #[test]
    fn unregistered_type_resolves_to_none() {
        struct Unregistered;
        impl Event for Unregistered {
            fn get_key(&self) -> String {
                String::new()
            }
        }

        let registry = EventRegistry::new();
        assert_eq!(registry.stream_for::<Unregistered>(), None);
    }
}
