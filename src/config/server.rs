use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// External URL of this installation (e.g., "https://geo-2.example.com/").
    /// The registered node whose URL matches is the current node. If not set,
    /// the URL is derived from the bind address.
    pub node_url: Option<String>,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("geosync.db")
    }

    #[must_use]
    pub fn current_node_url(&self) -> String {
        match &self.node_url {
            Some(url) => url.clone(),
            None => format!("http://{}:{}/", self.host, self.port),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            node_url: None,
        }
    }
}
