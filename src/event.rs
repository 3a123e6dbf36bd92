use crate::error::TraceError;

/// One request in a trace: a key and the number of bytes it occupies.
///
/// Weights are positive. [`replay`](crate::simulator::replay) refuses an
/// event of weight zero before any policy sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessEvent {
    pub key: u64,
    pub weight: u32,
}

impl AccessEvent {
    #[inline]
    pub fn new(key: u64, weight: u32) -> Self {
        Self { key, weight }
    }

    /// Builds an event, refusing a zero weight.
    pub fn try_new(key: u64, weight: u32) -> Result<Self, TraceError> {
        let event = Self::new(key, weight);
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> Result<(), TraceError> {
        if self.weight == 0 {
            return Err(TraceError::new(format!("key {} has zero weight", self.key)));
        }
        Ok(())
    }

    /// An unweighted request (weight 1).
    #[inline]
    pub fn key_only(key: u64) -> Self {
        Self { key, weight: 1 }
    }

    #[inline]
    pub(crate) fn weight_u64(&self) -> u64 {
        u64::from(self.weight)
    }
}

impl From<(u64, u32)> for AccessEvent {
    fn from((key, weight): (u64, u32)) -> Self {
        Self::new(key, weight)
    }
}
