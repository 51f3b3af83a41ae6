use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Tree,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Tree
        } else {
            Self::Json
        }
    }
}

/// One parsed wire value; composites carry their children.
#[derive(Debug, Serialize)]
pub struct WireNode {
    pub offset: usize,
    pub label: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<WireNode>,
}

impl WireNode {
    pub fn leaf(offset: usize, label: impl Into<String>) -> Self {
        Self {
            offset,
            label: label.into(),
            children: Vec::new(),
        }
    }
}

pub fn print_node(node: &WireNode, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(node).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Tree => print_tree(node, 0),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["OFFSET", "VALUE"]);
            add_rows(&mut table, node, 0);
            println!("{table}");
        }
    }
}

fn print_tree(node: &WireNode, depth: usize) {
    println!("{:06}  {}{}", node.offset, "  ".repeat(depth), node.label);
    for child in &node.children {
        print_tree(child, depth + 1);
    }
}

fn add_rows(table: &mut Table, node: &WireNode, depth: usize) {
    table.add_row(vec![
        format!("{:06}", node.offset),
        format!("{}{}", "  ".repeat(depth), node.label),
    ]);
    for child in &node.children {
        add_rows(table, child, depth + 1);
    }
}
