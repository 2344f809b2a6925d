//! CSV output of subnets and the free blocks between them.

use super::terminal::{format_field, format_percent};
use crate::models::{Ipv4, Subnet};
use chrono::SecondsFormat;

/// One line of the listing: an allocated subnet or an unallocated gap.
#[derive(Debug, Clone, PartialEq)]
pub enum ListingRow<'a> {
    Subnet(&'a Subnet),
    Gap(Ipv4),
}

impl ListingRow<'_> {
    fn prefix(&self) -> Ipv4 {
        match self {
            ListingRow::Subnet(s) => s.prefix,
            ListingRow::Gap(p) => *p,
        }
    }
}

/// Subnets and free blocks merged in address order.
pub fn listing_rows<'a>(subnets: &'a [Subnet], free: &[Ipv4]) -> Vec<ListingRow<'a>> {
    let mut rows: Vec<ListingRow> = subnets
        .iter()
        .map(ListingRow::Subnet)
        .chain(free.iter().map(|p| ListingRow::Gap(*p)))
        .collect();
    rows.sort_by_key(|r| r.prefix());
    rows
}

pub fn csv_header(label_name: &str) -> String {
    [
        format_field("cnt", 6),
        format_field("gap", 6),
        format_field("prefix", 20),
        format_field("broadcast", 17),
        format_field("name", 20),
        format_field(label_name, 24),
        format_field("parent", 20),
        format_field("offline", 9),
        format_field("online", 10),
        format_field("online_util", 13),
        format_field("last_scanned", 22),
    ]
    .join(",")
}

pub fn csv_row(j: usize, row: &ListingRow) -> String {
    match row {
        ListingRow::Subnet(s) => [
            format_field(j, 6),
            format_field("", 6),
            format_field(s.prefix, 20),
            format_field(s.prefix.hi(), 17),
            format_field(&s.name, 20),
            format_field(&s.label, 24),
            format_field(s.parent.map(|p| p.to_string()).unwrap_or_default(), 20),
            format_field(format_percent(Some(s.offline_utilization)), 9),
            format_field(s.online_status, 10),
            format_field(format_percent(s.online_utilization), 13),
            format_field(
                s.last_scanned
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_default(),
                22,
            ),
        ]
        .join(","),
        ListingRow::Gap(p) => [
            format_field(j, 6),
            format_field("GAP", 6),
            format_field(p, 20),
            format_field(p.hi(), 17),
        ]
        .join(","),
    }
}

/// Print subnets, optionally interleaved with free blocks, as CSV to stdout.
pub fn print_subnets(subnets: &[Subnet], free: &[Ipv4], label_name: &str) {
    log::info!(
        "#Start print_subnets() subnets={} gaps={}",
        subnets.len(),
        free.len()
    );
    println!("{}", csv_header(label_name));
    for (j, row) in listing_rows(subnets, free).iter().enumerate() {
        println!("{}", csv_row(j + 1, row));
    }
}

/// Print free blocks only, one prefix per line with its address count.
pub fn print_free_blocks(parent: Ipv4, free: &[Ipv4]) {
    println!("{},{}", format_field("free_in", 20), format_field(parent, 20));
    for block in free {
        println!(
            "{},{}",
            format_field(block, 20),
            format_field(format!("{}_addresses", block.num_addresses()), 20)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubnetDraft;

    fn ip(s: &str) -> Ipv4 {
        Ipv4::new(s).unwrap()
    }

    #[test]
    fn test_listing_interleaves_gaps() {
        let subnets = vec![
            Subnet::child(SubnetDraft::new(ip("10.0.0.128/26")), ip("10.0.0.0/24"), ip("10.0.0.0/24")),
            Subnet::child(SubnetDraft::new(ip("10.0.0.0/26")), ip("10.0.0.0/24"), ip("10.0.0.0/24")),
        ];
        let free = vec![ip("10.0.0.64/26"), ip("10.0.0.192/26")];
        let order: Vec<Ipv4> = listing_rows(&subnets, &free).iter().map(|r| r.prefix()).collect();
        assert_eq!(
            order,
            vec![
                ip("10.0.0.0/26"),
                ip("10.0.0.64/26"),
                ip("10.0.0.128/26"),
                ip("10.0.0.192/26")
            ]
        );
    }

    #[test]
    fn test_csv_row_fields() {
        let subnet = Subnet::root(SubnetDraft::named(ip("10.0.0.0/24"), "lab", "test bench"));
        let row = csv_row(1, &ListingRow::Subnet(&subnet));
        assert!(row.contains("\"10.0.0.0/24\""));
        assert!(row.contains("\"10.0.0.255\""));
        assert!(row.contains("\"test bench\""));
        assert!(row.contains("\"0.00%\""));
        assert!(row.contains("\"unknown\""));

        let gap = csv_row(2, &ListingRow::Gap(ip("10.0.1.0/25")));
        assert!(gap.contains("\"GAP\""));
        assert!(gap.contains("\"10.0.1.127\""));
    }

    #[test]
    fn test_header_uses_label_name() {
        assert!(csv_header("service").contains("\"service\""));
    }
}
