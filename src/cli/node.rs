use std::fmt;
use std::fs;
use std::path::PathBuf;

use inquire::{Confirm, Select, Text};
use serde::Serialize;

use crate::store::{SqliteStore, Store};
use crate::types::{GeoNode, NewNode, NodeRole};

use super::RoleArg;
use super::init_store;

/// Node with its URL for display
struct NodeDisplay(GeoNode);

impl fmt::Display for NodeDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} [{}]", self.0.id, self.0.url(), self.0.role)
    }
}

#[derive(Serialize)]
struct NodeOutput {
    id: i64,
    url: String,
    role: NodeRole,
    enabled: bool,
    namespace_ids: Vec<i64>,
    repos_max_capacity: u32,
    files_max_capacity: u32,
}

impl From<&GeoNode> for NodeOutput {
    fn from(node: &GeoNode) -> Self {
        Self {
            id: node.id,
            url: node.url(),
            role: node.role,
            enabled: node.enabled,
            namespace_ids: node.namespace_ids.clone(),
            repos_max_capacity: node.repos_max_capacity,
            files_max_capacity: node.files_max_capacity,
        }
    }
}

fn parse_node_url(url: &str, role: NodeRole) -> anyhow::Result<NewNode> {
    NewNode::from_url(url, role)
        .ok_or_else(|| anyhow::anyhow!("Invalid node URL '{url}', expected scheme://host[:port]/[path]"))
}

pub fn run_init(
    data_dir: String,
    node_url: Option<String>,
    role: RoleArg,
    non_interactive: bool,
) -> anyhow::Result<()> {
    let data_path = PathBuf::from(data_dir);
    fs::create_dir_all(&data_path)?;

    let db_path = data_path.join("geosync.db");
    let store = SqliteStore::new(&db_path)?;
    store.initialize()?;

    if !store.list_nodes()?.is_empty() {
        println!("Database already initialized at {}", db_path.display());
        return Ok(());
    }

    let registration = match node_url {
        Some(url) => Some((url, NodeRole::from(role))),
        None if non_interactive => None,
        None => prompt_registration()?,
    };

    println!();
    println!("Initialized database at {}", db_path.display());

    if let Some((url, role)) = registration {
        let node = store.create_node(&parse_node_url(&url, role)?)?;
        println!("Registered this installation as {} node #{} ({})", node.role, node.id, node.url());
    }
    println!();

    Ok(())
}

fn prompt_registration() -> anyhow::Result<Option<(String, NodeRole)>> {
    let register = Confirm::new("Register this installation as a Geo node?")
        .with_default(true)
        .prompt()?;
    if !register {
        return Ok(None);
    }

    let url = Text::new("External URL:")
        .with_validator(|input: &str| {
            if NewNode::from_url(input, NodeRole::Primary).is_some() {
                Ok(inquire::validator::Validation::Valid)
            } else {
                Ok(inquire::validator::Validation::Invalid(
                    "Expected scheme://host[:port]/[path]".into(),
                ))
            }
        })
        .prompt()?;

    let role = Select::new("Role:", vec![NodeRole::Primary, NodeRole::Secondary]).prompt()?;

    Ok(Some((url, role)))
}

#[allow(clippy::too_many_arguments)]
pub fn run_node_add(
    data_dir: String,
    url: String,
    role: RoleArg,
    namespaces: Vec<i64>,
    repos_max_capacity: u32,
    files_max_capacity: u32,
    disabled: bool,
) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;

    let mut node = parse_node_url(&url, role.into())?;
    node.namespace_ids = namespaces;
    node.repos_max_capacity = repos_max_capacity;
    node.files_max_capacity = files_max_capacity;
    node.enabled = !disabled;

    for namespace_id in &node.namespace_ids {
        if store.get_namespace(*namespace_id)?.is_none() {
            anyhow::bail!("Namespace {namespace_id} does not exist");
        }
    }

    let node = store.create_node(&node)?;

    println!();
    println!("Added {} node #{} ({})", node.role, node.id, node.url());
    println!();

    Ok(())
}

pub fn run_node_list(data_dir: String, json: bool) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;
    let nodes = store.list_nodes()?;

    if json {
        let output: Vec<NodeOutput> = nodes.iter().map(NodeOutput::from).collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if nodes.is_empty() {
        println!("No Geo nodes registered");
        return Ok(());
    }

    for node in &nodes {
        let state = if node.enabled { "enabled" } else { "disabled" };
        let scope = if node.restricts_namespaces() {
            format!("namespaces {:?}", node.namespace_ids)
        } else {
            "all namespaces".to_string()
        };
        println!(
            "{:>4}  {:<9}  {:<8}  {}  ({scope}, capacity {}/{})",
            node.id,
            node.role,
            state,
            node.url(),
            node.repos_max_capacity,
            node.files_max_capacity
        );
    }

    Ok(())
}

pub fn run_node_remove(
    data_dir: String,
    id: Option<i64>,
    non_interactive: bool,
    yes: bool,
) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;

    let node = match id {
        Some(id) => store
            .get_node(id)?
            .ok_or_else(|| anyhow::anyhow!("Node {id} not found"))?,
        None if non_interactive => anyhow::bail!("--id is required in non-interactive mode"),
        None => {
            let nodes: Vec<NodeDisplay> = store.list_nodes()?.into_iter().map(NodeDisplay).collect();
            if nodes.is_empty() {
                anyhow::bail!("No Geo nodes registered");
            }
            Select::new("Node to remove:", nodes).prompt()?.0
        }
    };

    if !yes && !non_interactive {
        let confirmed = Confirm::new(&format!("Remove node {}?", node.url()))
            .with_default(false)
            .prompt()?;
        if !confirmed {
            println!("Aborted");
            return Ok(());
        }
    }

    store.delete_node(node.id)?;

    println!();
    println!("Removed node #{} ({})", node.id, node.url());
    println!();

    Ok(())
}
