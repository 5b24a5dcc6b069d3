use std::io;

use tokio::net::TcpListener;

/// Bind a listener on the preferred port, probing the following ports when
/// it is taken. `exclude` keeps the second listener off the port the first
/// one landed on.
pub async fn bind_with_probe(
    host: &str,
    preferred: u16,
    probe_limit: u16,
    exclude: Option<u16>,
) -> io::Result<(TcpListener, u16)> {
    let mut last_err = None;

    for offset in 0..probe_limit {
        let Some(port) = preferred.checked_add(offset) else {
            break;
        };
        if Some(port) == exclude {
            continue;
        }

        match TcpListener::bind((host, port)).await {
            Ok(listener) => {
                // Port 0 asks the OS for an ephemeral port; report the real one.
                let actual = listener.local_addr()?.port();
                if offset > 0 {
                    tracing::warn!(
                        preferred,
                        port = actual,
                        "Preferred port in use, moved to next free"
                    );
                }
                return Ok((listener, actual));
            }
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("no free port in {preferred}..{}", preferred.saturating_add(probe_limit)),
        )
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probes_past_taken_port() {
        let (first, port) = bind_with_probe("127.0.0.1", 0, 1, None).await.unwrap();
        // Preferred port is now taken; the probe should land one above it.
        let (_second, second_port) = bind_with_probe("127.0.0.1", port, 10, None).await.unwrap();
        assert_ne!(second_port, port);
        drop(first);
    }

    #[tokio::test]
    async fn test_excluded_port_skipped() {
        let (listener, port) = bind_with_probe("127.0.0.1", 0, 1, None).await.unwrap();
        drop(listener);
        // Even though `port` is free again, exclusion forces a different one.
        let (_listener, chosen) = bind_with_probe("127.0.0.1", port, 10, Some(port))
            .await
            .unwrap();
        assert_ne!(chosen, port);
    }
}
