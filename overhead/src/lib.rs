//! Geofiltered, deduplicated aircraft alerts from an ADS-B feed.
//!
//! The pieces are independent: [`feed`] turns a PiAware `aircraft.json`
//! document into [`feed::Position`]s, [`filter`] keeps the ones inside a
//! radius and below an altitude ceiling, [`dedupe`] decides which of those
//! are worth another alert, and [`notify`] delivers the alerts. [`catalog`]
//! archives every sighting and [`stats`] keeps running counters.
#![warn(
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    missing_debug_implementations,
    unreachable_pub
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod catalog;
pub mod dedupe;
pub mod feed;
pub mod filter;
pub mod geodesy;
pub mod notify;
pub mod stats;

#[cfg(test)]
mod testing;
