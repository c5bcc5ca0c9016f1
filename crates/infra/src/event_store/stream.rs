use shiptrack_core::Aggregate;

/// Name of one aggregate's event stream.
///
/// Derived deterministically from the aggregate type and identity, e.g.
/// `Shipment-0190f3a4-...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn for_aggregate<A: Aggregate>(id: &A::Id) -> Self {
        Self(format!("{}-{}", A::AGGREGATE_TYPE, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for StreamId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
