//! Pool tunings and their defaults.

/// Name given to pools the user left unnamed.
pub(crate) const DEFAULT_NAME: &str = "brigade";

/// Default queue-capacity to laborer ratio.
pub(crate) const DEFAULT_RATIO: usize = 2;

/// Tunings for a [`Pool`](crate::Pool).
///
/// Zero-valued (or empty) fields are replaced with defaults when the pool
/// is constructed; the normalized copy is what the pool keeps.
#[derive(Debug, Clone, Default)]
pub struct Settings {
  /// Number of laborers performing work in parallel. Zero means one per
  /// logical CPU core.
  pub laborers: usize,

  /// Capacity of the input, output, and error queues (each gets its own).
  /// Zero derives the capacity as `ratio * laborers`; a non-zero value is
  /// kept as a manual override.
  pub size: usize,

  /// Derivation factor for `size`. Zero means 2.
  pub ratio: usize,

  /// Human-readable pool name, carried on every log event the pool emits.
  pub name: String,

  /// Log the pool's settings and lifecycle transitions at info level
  /// instead of debug. Fine-grained filtering stays with the tracing
  /// subscriber.
  pub debug: bool,
}

impl Settings {
  /// Fills unset fields with their defaults and returns the result.
  pub(crate) fn normalized(mut self) -> Self {
    if self.laborers == 0 {
      self.laborers = num_cpus::get();
    }
    if self.ratio == 0 {
      self.ratio = DEFAULT_RATIO;
    }
    if self.size == 0 {
      self.size = self.ratio * self.laborers;
    }
    if self.name.is_empty() {
      self.name = DEFAULT_NAME.to_string();
    }
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_fill_every_field() {
    let settings = Settings::default().normalized();
    assert!(settings.laborers >= 1);
    assert_eq!(settings.ratio, DEFAULT_RATIO);
    assert_eq!(settings.size, settings.ratio * settings.laborers);
    assert_eq!(settings.name, DEFAULT_NAME);
    assert!(!settings.debug);
  }

  #[test]
  fn manual_size_is_kept() {
    let settings = Settings {
      laborers: 4,
      size: 3,
      ..Settings::default()
    }
    .normalized();
    assert_eq!(settings.size, 3);
  }

  #[test]
  fn ratio_drives_the_derived_size() {
    let settings = Settings {
      laborers: 3,
      ratio: 4,
      ..Settings::default()
    }
    .normalized();
    assert_eq!(settings.size, 12);
  }

  #[test]
  fn name_is_defaulted_only_when_empty() {
    let named = Settings {
      name: "resizer".to_string(),
      ..Settings::default()
    }
    .normalized();
    assert_eq!(named.name, "resizer");
  }
}
