//! Cluster harness shared by the integration tests.

#![allow(dead_code)]

use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use udp_shared_memory::codec::{Key, Value};
use udp_shared_memory::{Endpoint, Node, NodeConfig};

pub const HOST: &str = "127.0.0.1";

/// Full mesh of real nodes on localhost with sequential ports.
pub struct TestCluster<K, V> {
    nodes: Vec<Node<K, V>>,
}

impl<K: Key, V: Value> TestCluster<K, V> {
    /// Starts `n` nodes on ports `base_port..base_port + n`, each peering with
    /// every other node.
    pub async fn spawn(n: usize, base_port: u16) -> Result<Self> {
        let endpoints: Vec<Endpoint> = (0..n)
            .map(|i| Endpoint::new(HOST, base_port + i as u16))
            .collect();

        let mut nodes = Vec::with_capacity(n);
        for listen in &endpoints {
            let peers = endpoints.iter().filter(|e| *e != listen).cloned().collect();
            let node = Node::new(NodeConfig::new(listen.clone(), peers))?;
            node.start().await?;
            nodes.push(node);
        }
        Ok(Self { nodes })
    }

    pub fn node(&self, index: usize) -> &Node<K, V> {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[Node<K, V>] {
        &self.nodes
    }

    pub async fn shutdown(self) {
        for node in &self.nodes {
            node.stop().await;
        }
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, what: &str, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    loop {
        if condition() {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("timeout waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
