use crate::types::{Address, TransferGraph, short_address};
use petgraph::Directed;
use petgraph::Graph;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryEdge {
    pub no_transfers: usize,
    pub total_value: f64,
}

impl Display for SummaryEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:.8})", self.no_transfers, self.total_value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedTransfer {
    pub from: Address,
    pub to: Address,
    pub no_transfers: usize,
    pub total_value: f64,
}

impl Display for AggregatedTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {} for {} transfers, {:.8} BTC",
            short_address(&self.from),
            short_address(&self.to),
            self.no_transfers,
            self.total_value
        )
    }
}

/// TransferSummary
///
/// A TransferSummary is primarily a graph that collapses the parallel TransferEdges
/// between each ordered pair of addresses into one edge with a count and a summed value.
///
/// It optionally has a tabular representation, a Vec<AggregatedTransfer>.
pub struct TransferSummary {
    pub summary_graph: Graph<Address, SummaryEdge, Directed>,
    pub summary_table: Option<Vec<AggregatedTransfer>>,
}

impl TransferSummary {
    pub fn from_transfer_graph(graph: &TransferGraph) -> Self {
        // BTreeMap keeps the summary graph deterministic
        let mut acc: BTreeMap<(Address, Address), (usize, f64)> = BTreeMap::new();

        for edge in graph.edge_references() {
            let key = (
                graph[edge.source()].address.clone(),
                graph[edge.target()].address.clone(),
            );
            let entry = acc.entry(key).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += edge.weight().value;
        }

        let mut summary_graph = Graph::<Address, SummaryEdge, Directed>::new();
        let mut node_map = HashMap::<Address, NodeIndex>::new();

        for ((from, to), (no_transfers, total_value)) in acc {
            let from_index = *node_map
                .entry(from.clone())
                .or_insert_with(|| summary_graph.add_node(from));
            let to_index = *node_map
                .entry(to.clone())
                .or_insert_with(|| summary_graph.add_node(to));

            summary_graph.add_edge(
                from_index,
                to_index,
                SummaryEdge {
                    no_transfers,
                    total_value,
                },
            );
        }

        TransferSummary {
            summary_graph,
            summary_table: None,
        }
    }

    pub fn with_summary_table(self) -> Self {
        let aggregated_transfers = self
            .summary_graph
            .edge_references()
            .map(|edge| AggregatedTransfer {
                from: self.summary_graph[edge.source()].clone(),
                to: self.summary_graph[edge.target()].clone(),
                no_transfers: edge.weight().no_transfers,
                total_value: edge.weight().total_value,
            })
            .collect();

        Self {
            summary_graph: self.summary_graph,
            summary_table: Some(aggregated_transfers),
        }
    }

    pub fn has_summary_table(&self) -> bool {
        self.summary_table.is_some()
    }
}

impl Display for TransferSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(table) = &self.summary_table {
            let mut sorted_table = table.clone();

            sorted_table.sort_by(|a, b| {
                a.from
                    .cmp(&b.from)
                    .then_with(|| b.no_transfers.cmp(&a.no_transfers))
            });

            for transfer in sorted_table {
                writeln!(f, "{}", transfer)?;
            }
        } else {
            writeln!(f, "Transfer Summary:")?;
            for edge in self.summary_graph.edge_references() {
                writeln!(
                    f,
                    "{} -> {} for {}",
                    short_address(&self.summary_graph[edge.source()]),
                    short_address(&self.summary_graph[edge.target()]),
                    edge.weight()
                )?;
            }
        }
        Ok(())
    }
}

/// EdgeTable
///
/// Every edge of a transfer graph as a row of a plain-text table: tx, from, to, value, date.
pub struct EdgeTable {
    rows: Vec<[String; 5]>,
}

impl EdgeTable {
    const HEADERS: [&'static str; 5] = ["Tx Hash", "From", "To", "Value (BTC)", "Date"];

    pub fn from_transfer_graph(graph: &TransferGraph) -> Self {
        let rows = graph
            .edge_references()
            .map(|edge| {
                let transfer = edge.weight();
                [
                    short_address(&transfer.tx_id),
                    short_address(&graph[edge.source()].address),
                    short_address(&graph[edge.target()].address),
                    format!("{:.8}", transfer.value),
                    transfer.date.clone(),
                ]
            })
            .collect();
        Self { rows }
    }

    fn widths(&self) -> [usize; 5] {
        let mut widths = Self::HEADERS.map(str::len);
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.len());
            }
        }
        widths
    }
}

fn write_row<S: AsRef<str>>(
    f: &mut std::fmt::Formatter<'_>,
    cells: &[S],
    widths: &[usize; 5],
) -> std::fmt::Result {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell.as_ref(), width = *width))
        .collect();
    writeln!(f, "| {} |", padded.join(" | "))
}

impl Display for EdgeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let widths = self.widths();
        write_row(f, &Self::HEADERS, &widths)?;
        write_row(f, &widths.map(|w| "-".repeat(w)), &widths)?;
        for row in &self.rows {
            write_row(f, row, &widths)?;
        }
        Ok(())
    }
}

/// Renders every edge as a row of a plain-text table.
pub fn edge_table(graph: &TransferGraph) -> String {
    EdgeTable::from_transfer_graph(graph).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TransferEdge, WalletNode};

    fn graph() -> TransferGraph {
        let mut graph = TransferGraph::new();
        let a = graph.add_node(WalletNode::new("A".into()));
        let b = graph.add_node(WalletNode::new("B".into()));
        let c = graph.add_node(WalletNode::new("C".into()));
        for (to, value, tx) in [(b, 1.0, "t1"), (b, 2.5, "t2"), (c, 4.0, "t2")] {
            graph.add_edge(
                a,
                to,
                TransferEdge {
                    tx_id: tx.into(),
                    value,
                    date: "2024-01-01".into(),
                },
            );
        }
        graph
    }

    #[test]
    fn parallel_edges_collapse_into_counts_and_sums() {
        let summary = TransferSummary::from_transfer_graph(&graph()).with_summary_table();
        let table = summary.summary_table.clone().unwrap();
        assert_eq!(
            table,
            vec![
                AggregatedTransfer {
                    from: "A".into(),
                    to: "B".into(),
                    no_transfers: 2,
                    total_value: 3.5,
                },
                AggregatedTransfer {
                    from: "A".into(),
                    to: "C".into(),
                    no_transfers: 1,
                    total_value: 4.0,
                },
            ]
        );
        assert_eq!(summary.summary_graph.node_count(), 3);
        assert_eq!(
            summary.to_string(),
            "A -> B for 2 transfers, 3.50000000 BTC\nA -> C for 1 transfers, 4.00000000 BTC\n"
        );
    }

    #[test]
    fn edge_table_has_header_rule_and_one_row_per_edge() {
        let table = edge_table(&graph());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("| Tx Hash"));
        assert!(lines[1].starts_with("| ---"));
        assert!(lines[4].contains("4.00000000"));
    }
}
