use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

use super::target_of;
use crate::error::ModuleError;
use crate::exploits::{
    ExecutionMode, ExploitKind, ExploitModule, ModuleOutput, ScanOptions, Severity, Subject,
    Vulnerability,
};

const KIND: &str = "Exposed network service";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

const COMMON_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 80, 110, 143, 443, 445, 3306, 3389, 5432, 6379, 8080, 8443, 27017,
];

/// TCP connect scan of the target host. Each port is tried once, with at
/// most `concurrency` connects in flight.
pub struct PortScanner {
    concurrency: usize,
}

impl PortScanner {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }
}

#[async_trait]
impl ExploitModule for PortScanner {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }

    async fn run(
        &self,
        subject: &Subject,
        options: &ScanOptions,
        deadline: Instant,
    ) -> Result<ModuleOutput, ModuleError> {
        let target = target_of(subject, ExploitKind::NetworkScan)?;
        let host = target
            .host_str()
            .ok_or_else(|| ModuleError::Unreachable(format!("{target} has no host")))?;
        let ip = resolve(host).await?;

        let mut ports = options
            .ports
            .clone()
            .unwrap_or_else(|| COMMON_PORTS.to_vec());
        ports.sort_unstable();
        ports.dedup();
        let budget_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64;
        if budget_ms == 0 {
            return Err(ModuleError::Timeout(0));
        }

        let mut open: Vec<u16> = stream::iter(ports)
            .map(|port| async move {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return None;
                }
                let addr = SocketAddr::new(ip, port);
                let connect = timeout(left.min(CONNECT_TIMEOUT), TcpStream::connect(addr)).await;
                matches!(connect, Ok(Ok(_))).then_some(port)
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|port| async move { port })
            .collect()
            .await;
        if Instant::now() >= deadline {
            return Err(ModuleError::Timeout(budget_ms));
        }
        open.sort_unstable();

        let findings = open.into_iter().map(|port| open_port(host, port)).collect();
        Ok(ModuleOutput::new(findings, 0))
    }
}

async fn resolve(host: &str) -> Result<IpAddr, ModuleError> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| ModuleError::Unreachable(format!("{host}: {e}")))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| ModuleError::Unreachable(format!("{host}: no addresses")))
}

fn service(port: u16) -> (&'static str, Severity) {
    match port {
        21 => ("FTP", Severity::Medium),
        22 => ("SSH", Severity::Info),
        23 => ("Telnet", Severity::High),
        25 => ("SMTP", Severity::Info),
        53 => ("DNS", Severity::Info),
        80 => ("HTTP", Severity::Info),
        110 => ("POP3", Severity::Low),
        143 => ("IMAP", Severity::Low),
        443 => ("HTTPS", Severity::Info),
        445 => ("SMB", Severity::High),
        3306 => ("MySQL", Severity::High),
        3389 => ("RDP", Severity::High),
        5432 => ("PostgreSQL", Severity::High),
        6379 => ("Redis", Severity::High),
        8080 | 8443 => ("HTTP alternate", Severity::Info),
        27017 => ("MongoDB", Severity::High),
        _ => ("unknown", Severity::Info),
    }
}

fn open_port(host: &str, port: u16) -> Vulnerability {
    let (name, severity) = service(port);
    let finding = Vulnerability::new(
        KIND,
        severity,
        format!("{host}:{port}"),
        format!("Port {port} ({name}) accepts TCP connections"),
    )
    .with_evidence(format!("TCP connect to {host}:{port} succeeded"));
    if severity >= Severity::Medium {
        finding
            .with_recommendation("Restrict the service to trusted networks with a firewall.")
            .with_cwe("CWE-200")
    } else {
        finding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[tokio::test]
    async fn reports_only_listening_ports() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = {
            let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let options = ScanOptions {
            ports: Some(vec![open, closed]),
            ..ScanOptions::default()
        };
        let subject = Subject::Target(Url::parse(&format!("http://127.0.0.1:{open}/")).unwrap());
        let output = PortScanner::new(8)
            .run(&subject, &options, Instant::now() + Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.vulnerabilities.len(), 1);
        assert_eq!(output.vulnerabilities[0].location, format!("127.0.0.1:{open}"));
        drop(listener);
    }

    #[tokio::test]
    async fn repeated_ports_are_scanned_once() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let options = ScanOptions {
            ports: Some(vec![open; 5]),
            ..ScanOptions::default()
        };
        let subject = Subject::Target(Url::parse(&format!("http://127.0.0.1:{open}/")).unwrap());
        let output = PortScanner::new(2)
            .run(&subject, &options, Instant::now() + Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.vulnerabilities.len(), 1);
        drop(listener);
    }

    #[test]
    fn database_ports_rank_high() {
        assert_eq!(service(3306).1, Severity::High);
        assert_eq!(service(22).1, Severity::Info);
        assert!(open_port("db", 5432).recommendation.is_some());
        assert!(open_port("web", 80).recommendation.is_none());
    }

    #[tokio::test]
    async fn unresolvable_host_is_unreachable() {
        let subject = Subject::Target(Url::parse("http://no-such-host.invalid/").unwrap());
        let err = PortScanner::new(8)
            .run(&subject, &ScanOptions::default(), Instant::now() + Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::Unreachable(_)));
    }
}
