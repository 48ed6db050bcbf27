use clap::{Subcommand, ValueEnum};

use crate::types::NodeRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    Primary,
    Secondary,
}

impl From<RoleArg> for NodeRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Primary => NodeRole::Primary,
            RoleArg::Secondary => NodeRole::Secondary,
        }
    }
}

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Initialize the database and optionally register this installation
    Init {
        /// Data directory for database and repositories
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// External URL of this installation, registered as a Geo node
        #[arg(long)]
        node_url: Option<String>,

        /// Role of this installation when registering it
        #[arg(long, value_enum, default_value = "primary")]
        role: RoleArg,

        /// Skip interactive prompts
        #[arg(long)]
        non_interactive: bool,
    },

    /// Manage Geo nodes
    Node {
        #[command(subcommand)]
        command: NodeCommands,
    },
}

#[derive(Subcommand)]
pub enum NodeCommands {
    /// Register a Geo node
    Add {
        /// Data directory for database and repositories
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// External URL of the node (e.g., "https://geo-2.example.com/")
        #[arg(long)]
        url: String,

        #[arg(long, value_enum, default_value = "secondary")]
        role: RoleArg,

        /// Restrict replication to this namespace id (repeatable)
        #[arg(long = "namespace")]
        namespaces: Vec<i64>,

        /// Maximum concurrent repository sync jobs
        #[arg(long, default_value = "25")]
        repos_max_capacity: u32,

        /// Maximum concurrent file sync jobs
        #[arg(long, default_value = "10")]
        files_max_capacity: u32,

        /// Register the node disabled
        #[arg(long)]
        disabled: bool,
    },

    /// List registered Geo nodes
    List {
        /// Data directory for database and repositories
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove a Geo node
    Remove {
        /// Data directory for database and repositories
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Node id (prompts if omitted)
        #[arg(long)]
        id: Option<i64>,

        /// Skip interactive prompts
        #[arg(long)]
        non_interactive: bool,

        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
}
