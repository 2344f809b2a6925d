//! Output formatting for subnet listings.
//!
//! - [`csv`] - CSV output formatting
//! - [`terminal`] - field formatting and colors

mod csv;
mod terminal;

pub use csv::{csv_header, csv_row, listing_rows, print_free_blocks, print_subnets, ListingRow};
pub use terminal::{format_field, format_percent, status_label};
