use crate::types::{TransferGraph, short_address};
use anyhow::{Context, Result};
use petgraph::algo::tarjan_scc;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display};
use std::fs;
use std::path::Path;
use tracing::info;

fn dot_escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

struct Dot<'a>(&'a TransferGraph);

impl Display for Dot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.0;
        writeln!(f, "digraph TransferGraph {{")?;
        writeln!(f, "  node [shape=ellipse];")?;
        writeln!(f, "  edge [dir=forward];")?;
        writeln!(f)?;

        for node in graph.node_weights() {
            let label = if node.label.is_empty() {
                short_address(&node.address)
            } else {
                node.label.clone()
            };
            writeln!(
                f,
                "  \"{}\" [label=\"{}\"];",
                dot_escape(&node.address),
                dot_escape(&label)
            )?;
        }

        writeln!(f)?;

        for edge in graph.edge_references() {
            let transfer = edge.weight();
            writeln!(
                f,
                "  \"{}\" -> \"{}\" [label=\"{}\\n{}\" tooltip=\"Tx: {}\"];",
                dot_escape(&graph[edge.source()].address),
                dot_escape(&graph[edge.target()].address),
                transfer.value,
                dot_escape(&transfer.date),
                dot_escape(&transfer.tx_id)
            )?;
        }

        writeln!(f, "}}")
    }
}

/// Write TransferGraph into a DOT string for visualization
///
/// Useful for small to medium sized graphs with `https://dreampuf.github.io/GraphvizOnline/?engine=dot`
pub fn write_graph_to_dot(graph: &TransferGraph) -> String {
    Dot(graph).to_string()
}

struct GraphMl<'a>(&'a TransferGraph);

impl Display for GraphMl<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.0;
        writeln!(f, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
        writeln!(
            f,
            r#"<graphml xmlns="http://graphml.graphdrawing.org/xmlns" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:schemaLocation="http://graphml.graphdrawing.org/xmlns http://graphml.graphdrawing.org/xmlns/1.0/graphml.xsd">"#
        )?;
        for (id, domain, name, kind) in [
            ("d0", "node", "balance", "double"),
            ("d1", "node", "label", "string"),
            ("d2", "edge", "tx_id", "string"),
            ("d3", "edge", "value", "double"),
            ("d4", "edge", "date", "string"),
        ] {
            writeln!(
                f,
                r#"  <key id="{}" for="{}" attr.name="{}" attr.type="{}"/>"#,
                id, domain, name, kind
            )?;
        }
        writeln!(f, r#"  <graph edgedefault="directed">"#)?;

        for node in graph.node_weights() {
            writeln!(
                f,
                r#"    <node id="{}"><data key="d0">{}</data><data key="d1">{}</data></node>"#,
                xml_escape(&node.address),
                node.balance,
                xml_escape(&node.label)
            )?;
        }

        for edge in graph.edge_references() {
            let transfer = edge.weight();
            writeln!(
                f,
                r#"    <edge id="e{}" source="{}" target="{}"><data key="d2">{}</data><data key="d3">{}</data><data key="d4">{}</data></edge>"#,
                edge.id().index(),
                xml_escape(&graph[edge.source()].address),
                xml_escape(&graph[edge.target()].address),
                xml_escape(&transfer.tx_id),
                transfer.value,
                xml_escape(&transfer.date)
            )?;
        }

        writeln!(f, "  </graph>")?;
        writeln!(f, "</graphml>")
    }
}

/// Write TransferGraph as GraphML, readable by Gephi and networkx.
///
/// Nodes carry `balance` and `label`, edges carry `tx_id`, `value` and `date`.
/// Parallel edges are written one by one.
pub fn write_graph_to_graphml(graph: &TransferGraph) -> String {
    GraphMl(graph).to_string()
}

const SENDER_COLOR: &str = "#FF6B6B";
const RECEIVER_COLOR: &str = "#66BB6A";
const MIXED_COLOR: &str = "#FFA726";

const HTML_TEMPLATE: &str = r##"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Blockchain Visual</title>
  <script src="https://unpkg.com/vis-network@9.1.2/dist/vis-network.min.js"></script>
  <style>
    body { font-family: Arial, sans-serif; margin: 20px; }
    .dot { display: inline-block; width: 12px; height: 12px; border-radius: 50%; margin-right: 8px; }
    #controls { margin: 10px 0; display: flex; gap: 12px; align-items: center; }
    #controls button { padding: 6px 12px; border: none; border-radius: 4px; color: white; cursor: pointer; }
    #resetButton { background-color: #1976d2; }
    #exportCSVButton { background-color: #2e7d32; }
    #layout { display: flex; gap: 20px; }
    #network { flex: 2; height: 70vh; border: 1px solid lightgray; }
    #side { flex: 1; max-height: 70vh; overflow-y: auto; }
    #infoTable { width: 100%; border-collapse: collapse; }
    #infoTable th, #infoTable td { border: 1px solid #ccc; padding: 6px; font-size: 13px; }
  </style>
</head>
<body>
  <h2>Transaction graph</h2>
  <div id="totals"></div>
  <div>
    <span class="dot" style="background-color:#FF6B6B"></span>Sender
    <span class="dot" style="background-color:#66BB6A"></span>Receiver
    <span class="dot" style="background-color:#FFA726"></span>Both
  </div>
  <div id="controls">
    <button id="resetButton">Reset selection</button>
    <button id="exportCSVButton">Export to CSV</button>
    <label><input type="checkbox" id="toggleNodeLabels" checked> Show node labels</label>
  </div>
  <div id="layout">
    <div id="network"></div>
    <div id="side">
      <div id="selectedInfo"></div>
      <table id="infoTable">
        <thead><tr><th>Tx</th><th>From</th><th>To</th><th>Value</th><th>Date</th></tr></thead>
        <tbody id="tableBody"></tbody>
      </table>
    </div>
  </div>
  <script>
    const allEdges = __EDGES__;
    const allNodes = __NODES__;
    const nodes = new vis.DataSet(allNodes);
    const edges = new vis.DataSet(allEdges);
    const network = new vis.Network(document.getElementById("network"), { nodes, edges }, {
      layout: { improvedLayout: true },
      interaction: { tooltipDelay: 200 },
      physics: { stabilization: true }
    });
    document.getElementById("totals").innerText =
      `Nodes: ${allNodes.length}, transactions: ${allEdges.length}`;
    const short = (s) => s.length > 10 ? `${s.slice(0, 6)}...${s.slice(-4)}` : s;

    // rows currently listed in the table, full values for CSV export
    let shownRows = [];
    function showRows(rows, info) {
      shownRows = rows;
      document.getElementById("selectedInfo").innerText = info;
      const body = document.getElementById("tableBody");
      body.innerHTML = "";
      for (const e of rows) {
        const row = document.createElement("tr");
        for (const cell of [short(e.tx_id), short(e.from), short(e.to), `${e.value} BTC`, e.date]) {
          const td = document.createElement("td");
          td.textContent = cell;
          row.appendChild(td);
        }
        body.appendChild(row);
      }
    }

    function resetSelection() {
      edges.clear();
      edges.add(allEdges);
      network.unselectAll();
      showRows([], "");
    }

    network.on("selectNode", (params) => {
      const selected = params.nodes[0];
      const connected = allEdges.filter(e => e.from === selected || e.to === selected);
      edges.clear();
      edges.add(connected.map(e => ({ ...e, color: { color: e.from === selected ? "#d33" : "#2e7d32" }, width: 2 })));
      const node = allNodes.find(n => n.id === selected);
      showRows(connected, node ? `${selected}\n${node.title}` : selected);
    });

    network.on("selectEdge", (params) => {
      if (params.nodes.length > 0) {
        return;
      }
      const edge = allEdges.find(e => e.id === params.edges[0]);
      if (edge) {
        showRows([edge], `Tx ${edge.tx_id}`);
      }
    });

    network.on("deselectNode", resetSelection);
    document.getElementById("resetButton").addEventListener("click", resetSelection);

    document.getElementById("toggleNodeLabels").addEventListener("change", (event) => {
      const visible = event.target.checked;
      nodes.update(allNodes.map(n => ({ id: n.id, label: visible ? n.label : "" })));
    });

    document.getElementById("exportCSVButton").addEventListener("click", () => {
      if (shownRows.length === 0) {
        alert("Select a node or an edge first.");
        return;
      }
      const quote = (v) => `"${String(v).replace(/"/g, '""')}"`;
      const lines = [["tx_id", "from", "to", "value", "date"].map(quote).join(",")];
      for (const e of shownRows) {
        lines.push([e.tx_id, e.from, e.to, e.value, e.date].map(quote).join(","));
      }
      const blob = new Blob([lines.join("\n") + "\n"], { type: "text/csv;charset=utf-8;" });
      const link = document.createElement("a");
      link.href = URL.createObjectURL(blob);
      link.download = "transactions.csv";
      document.body.appendChild(link);
      link.click();
      document.body.removeChild(link);
    });
  </script>
</body>
</html>
"##;

/// Write TransferGraph as a self-contained vis-network page.
///
/// Nodes are coloured by role: only sending, only receiving, or both.
pub fn write_graph_to_html(graph: &TransferGraph) -> String {
    let senders: HashSet<NodeIndex> = graph.edge_references().map(|e| e.source()).collect();
    let receivers: HashSet<NodeIndex> = graph.edge_references().map(|e| e.target()).collect();

    let nodes: Vec<_> = graph
        .node_indices()
        .map(|idx| {
            let node = &graph[idx];
            let color = match (senders.contains(&idx), receivers.contains(&idx)) {
                (true, false) => SENDER_COLOR,
                (false, true) => RECEIVER_COLOR,
                _ => MIXED_COLOR,
            };
            json!({
                "id": node.address,
                "label": short_address(&node.address),
                "title": format!("Balance: {:.8} BTC", node.balance),
                "shape": "dot",
                "size": 15,
                "color": { "background": color, "border": "#333" },
                "font": { "size": 10 },
            })
        })
        .collect();

    let edges: Vec<_> = graph
        .edge_references()
        .map(|edge| {
            let transfer = edge.weight();
            let from = &graph[edge.source()].address;
            let to = &graph[edge.target()].address;
            json!({
                "id": format!("{}_{}_{}_{}", from, to, transfer.tx_id, edge.id().index()),
                "from": from,
                "to": to,
                "arrows": "to",
                "title": format!("TxID: {}\n{} BTC\nDate: {}", short_address(&transfer.tx_id), transfer.value, transfer.date),
                "color": { "color": "#999" },
                "value": transfer.value,
                "date": transfer.date,
                "tx_id": transfer.tx_id,
            })
        })
        .collect();

    // "</" inside a JSON string would close the script element
    let embed = |value: serde_json::Value| value.to_string().replace("</", "<\\/");
    HTML_TEMPLATE
        .replace("__NODES__", &embed(json!(nodes)))
        .replace("__EDGES__", &embed(json!(edges)))
}

fn save(contents: &str, path: &Path, kind: &str) -> Result<()> {
    fs::write(path, contents)
        .with_context(|| format!("Failed to write {} to {}", kind, path.display()))?;
    info!("Graph exported in {} format to {}", kind, path.display());
    Ok(())
}

pub fn save_graphml(graph: &TransferGraph, path: &Path) -> Result<()> {
    save(&write_graph_to_graphml(graph), path, "GraphML")
}

pub fn save_html(graph: &TransferGraph, path: &Path) -> Result<()> {
    save(&write_graph_to_html(graph), path, "HTML")
}

pub fn save_dot(graph: &TransferGraph, path: &Path) -> Result<()> {
    save(&write_graph_to_dot(graph), path, "DOT")
}

/// Groups of addresses that send value around in a circle, one sub-graph each.
pub fn find_closed_loops(graph: &TransferGraph) -> Vec<TransferGraph> {
    let mut closed_loops = Vec::new();

    let mut components = tarjan_scc(graph);
    components.retain(|scc| scc.len() > 1);

    for scc in components {
        let members: HashSet<NodeIndex> = scc.iter().copied().collect();
        let mut index_mapping = HashMap::new();
        let mut loop_graph = TransferGraph::new();

        for node in &scc {
            let new_idx = loop_graph.add_node(graph[*node].clone());
            index_mapping.insert(*node, new_idx);
        }

        for edge in graph.edge_references() {
            let (source, target) = (edge.source(), edge.target());
            if members.contains(&source) && members.contains(&target) {
                loop_graph.add_edge(
                    index_mapping[&source],
                    index_mapping[&target],
                    edge.weight().clone(),
                );
            }
        }

        closed_loops.push(loop_graph);
    }

    closed_loops
}
