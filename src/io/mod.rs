/// CSV export of stored time series.
pub mod export;
