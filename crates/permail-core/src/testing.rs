//! Scripted SMTP server for tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::rustls::{crypto, ServerConfig};
use tokio_rustls::TlsAcceptor;

/// Replies the fake server gives
#[derive(Clone)]
pub struct Script {
    /// Send the 220 greeting on accept
    pub greet: bool,
    /// AUTH capability line; `None` advertises no mechanism
    pub auth_capability: Option<&'static str>,
    pub auth: &'static str,
    pub mail: &'static str,
    pub rcpt: &'static str,
    pub data: &'static str,
    /// Hang up instead of answering RCPT
    pub drop_on_rcpt: bool,
    /// Offer STARTTLS and upgrade with a self-signed certificate
    pub starttls: Option<TlsAcceptor>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greet: true,
            auth_capability: Some("AUTH PLAIN LOGIN"),
            auth: "235 2.7.0 Authentication successful",
            mail: "250 2.1.0 Sender ok",
            rcpt: "250 2.1.5 Recipient ok",
            data: "354 End data with <CR><LF>.<CR><LF>",
            drop_on_rcpt: false,
            starttls: None,
        }
    }
}

impl Script {
    pub fn with_starttls() -> Self {
        Self {
            starttls: Some(self_signed_acceptor()),
            ..Default::default()
        }
    }
}

fn self_signed_acceptor() -> TlsAcceptor {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_der = CertificateDer::from(cert.serialize_der().unwrap());
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));
    let config = ServerConfig::builder_with_provider(Arc::new(crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

#[derive(Default)]
struct State {
    commands: Mutex<Vec<String>>,
    messages: Mutex<Vec<String>>,
    quits: AtomicUsize,
    closed: AtomicUsize,
}

pub struct FakeSmtp {
    port: u16,
    state: Arc<State>,
}

impl FakeSmtp {
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(State::default());

        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let script = script.clone();
                let state = shared.clone();
                tokio::spawn(async move {
                    session(stream, &script, &state).await;
                    state.closed.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        Self { port, state }
    }

    /// A local port nothing listens on
    pub async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.state.messages.lock().unwrap().clone()
    }

    pub fn quit_count(&self) -> usize {
        self.state.quits.load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Wait until `sessions` client sessions have ended
    pub async fn wait_closed(&self, sessions: usize) {
        for _ in 0..200 {
            if self.closed_count() >= sessions {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("fake SMTP server: sessions still open");
    }
}

#[derive(Debug, PartialEq, Eq)]
enum End {
    Closed,
    Starttls,
}

async fn session(stream: TcpStream, script: &Script, state: &State) {
    let mut plain = BufReader::new(stream);

    if !script.greet {
        // Hold the socket open without a word until the client gives up
        let mut line = String::new();
        while matches!(plain.read_line(&mut line).await, Ok(n) if n > 0) {
            line.clear();
        }
        return;
    }
    if plain.get_mut().write_all(b"220 fake.test ESMTP\r\n").await.is_err() {
        return;
    }

    if exchange(&mut plain, script, state, false).await != End::Starttls {
        return;
    }
    let Some(acceptor) = &script.starttls else {
        return;
    };
    let Ok(tls) = acceptor.accept(plain.into_inner()).await else {
        return;
    };
    exchange(&mut BufReader::new(tls), script, state, true).await;
}

async fn exchange<S>(stream: &mut BufReader<S>, script: &Script, state: &State, secure: bool) -> End
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut in_data = false;
    let mut message = String::new();
    let mut buf = String::new();
    loop {
        buf.clear();
        match stream.read_line(&mut buf).await {
            Ok(n) if n > 0 => {}
            _ => return End::Closed,
        }
        let line = buf.trim_end_matches(['\r', '\n']).to_string();
        let upper = line.to_ascii_uppercase();

        if in_data && upper != "QUIT" {
            if line == "." {
                in_data = false;
                state.messages.lock().unwrap().push(std::mem::take(&mut message));
                if !send(stream, "250 2.0.0 Queued").await {
                    return End::Closed;
                }
            } else {
                message.push_str(&line);
                message.push_str("\r\n");
            }
            continue;
        }

        state.commands.lock().unwrap().push(line.clone());
        let reply = if upper.starts_with("EHLO") || upper.starts_with("HELO") {
            let mut lines = vec!["fake.test", "8BITMIME"];
            if script.starttls.is_some() && !secure {
                lines.push("STARTTLS");
            }
            lines.extend(script.auth_capability);
            let last = lines.len() - 1;
            lines
                .iter()
                .enumerate()
                .map(|(i, l)| format!("250{}{}", if i == last { ' ' } else { '-' }, l))
                .collect::<Vec<_>>()
                .join("\r\n")
        } else if upper == "STARTTLS" && script.starttls.is_some() && !secure {
            send(stream, "220 2.0.0 Ready to start TLS").await;
            return End::Starttls;
        } else if upper.starts_with("AUTH") {
            script.auth.to_string()
        } else if upper.starts_with("MAIL") {
            script.mail.to_string()
        } else if upper.starts_with("RCPT") {
            if script.drop_on_rcpt {
                return End::Closed;
            }
            script.rcpt.to_string()
        } else if upper == "DATA" {
            in_data = script.data.starts_with("354");
            script.data.to_string()
        } else if upper == "QUIT" {
            state.quits.fetch_add(1, Ordering::SeqCst);
            send(stream, "221 2.0.0 Bye").await;
            return End::Closed;
        } else {
            "250 2.0.0 Ok".to_string()
        };

        if !send(stream, &reply).await {
            return End::Closed;
        }
    }
}

async fn send<S>(stream: &mut BufReader<S>, reply: &str) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let stream = stream.get_mut();
    stream.write_all(format!("{}\r\n", reply).as_bytes()).await.is_ok() && stream.flush().await.is_ok()
}
