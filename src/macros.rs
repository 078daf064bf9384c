macro_rules! _debug {
  ($($tt:tt)+) => {
    #[cfg(feature = "tracing")]
    tracing::debug!($($tt)+);
  };
}

macro_rules! _warn {
  ($($tt:tt)+) => {
    #[cfg(feature = "tracing")]
    tracing::warn!($($tt)+);
  };
}

macro_rules! _error {
  ($($tt:tt)+) => {
    #[cfg(feature = "tracing")]
    tracing::error!($($tt)+);
  };
}
