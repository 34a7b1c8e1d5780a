//! FTP upload of the parameter file to the mirror computer.
//!
//! Only what the upload needs: login, binary mode, optional CWD, one
//! passive-mode STOR, QUIT. The data connection goes to the control peer's
//! address with the port from the PASV reply, so servers that advertise a
//! private address behind NAT still work.

use async_trait::async_trait;
use bf_types::{ActuatorConfig, BfError, BfResult, PublishError};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::actuator::ActuatorSink;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    fn is(&self, codes: &[u16]) -> bool {
        codes.contains(&self.code)
    }
}

struct ControlChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
}

impl ControlChannel {
    async fn connect(host: &str, port: u16) -> BfResult<Self> {
        let stream = TcpStream::connect((host, port)).await.map_err(|e| {
            BfError::Publish(PublishError::Connect {
                host: format!("{host}:{port}"),
                message: e.to_string(),
            })
        })?;
        let peer = stream.peer_addr()?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
            peer,
        })
    }

    async fn read_reply(&mut self) -> BfResult<Reply> {
        let first = self.read_line().await?;
        let code = parse_code(&first)?;

        let mut text = first[3..].trim_start_matches(['-', ' ']).to_string();
        if first.as_bytes().get(3) == Some(&b'-') {
            // Multi-line reply ends with "<code> ".
            let terminator = format!("{code} ");
            loop {
                let line = self.read_line().await?;
                text.push('\n');
                if let Some(rest) = line.strip_prefix(&terminator) {
                    text.push_str(rest);
                    break;
                }
                text.push_str(&line);
            }
        }

        Ok(Reply { code, text })
    }

    async fn read_line(&mut self) -> BfResult<String> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).await?;
        if read == 0 {
            return Err(transfer("server closed the control connection"));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn send(&mut self, command: &str) -> BfResult<Reply> {
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        let reply = self.read_reply().await?;
        let verb = command.split_whitespace().next().unwrap_or(command);
        debug!(command = verb, code = reply.code, "ftp reply");
        Ok(reply)
    }

    async fn require(&mut self, command: &str, codes: &[u16]) -> BfResult<Reply> {
        let reply = self.send(command).await?;
        if !reply.is(codes) {
            return Err(unexpected(command, &reply));
        }
        Ok(reply)
    }
}

/// Uploads the local parameter file over FTP on every publish.
#[derive(Debug, Clone)]
pub struct FtpSink {
    host: String,
    port: u16,
    user: String,
    password: String,
    remote_directory: Option<String>,
    local_file: PathBuf,
    timeout: Duration,
}

impl FtpSink {
    pub fn new(config: &ActuatorConfig, local_file: impl Into<PathBuf>) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            password: config.password.clone(),
            remote_directory: config.remote_directory.clone(),
            local_file: local_file.into(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }

    fn remote_name(&self) -> BfResult<String> {
        self.local_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| transfer(format!("{} has no file name", self.local_file.display())))
    }

    async fn upload(&self, contents: &[u8]) -> BfResult<()> {
        let remote_name = self.remote_name()?;
        let mut control = ControlChannel::connect(&self.host, self.port).await?;

        let greeting = control.read_reply().await?;
        if !greeting.is(&[220]) {
            return Err(unexpected("greeting", &greeting));
        }

        self.login(&mut control).await?;
        control.require("TYPE I", &[200]).await?;
        if let Some(directory) = &self.remote_directory {
            control.require(&format!("CWD {directory}"), &[250]).await?;
        }

        let passive = control.require("PASV", &[227]).await?;
        let port = parse_pasv_port(&passive.text)?;
        let mut data = TcpStream::connect((control.peer.ip(), port))
            .await
            .map_err(|e| transfer(format!("data connection to port {port}: {e}")))?;

        control
            .require(&format!("STOR {remote_name}"), &[125, 150])
            .await?;
        data.write_all(contents).await?;
        data.shutdown().await?;
        drop(data);

        let done = control.read_reply().await?;
        if !done.is(&[226, 250]) {
            return Err(unexpected("STOR completion", &done));
        }

        // The file is stored; a failed goodbye is not worth a retry.
        let _ = control.send("QUIT").await;
        Ok(())
    }

    async fn login(&self, control: &mut ControlChannel) -> BfResult<()> {
        let reply = control.send(&format!("USER {}", self.user)).await?;
        let reply = match reply.code {
            230 => return Ok(()),
            331 => control.send(&format!("PASS {}", self.password)).await?,
            _ => reply,
        };
        if reply.is(&[230, 202]) {
            return Ok(());
        }
        Err(BfError::Publish(PublishError::Authentication {
            user: self.user.clone(),
            reply: format!("{} {}", reply.code, reply.text),
        }))
    }
}

#[async_trait]
impl ActuatorSink for FtpSink {
    async fn publish(&mut self, target: i64) -> BfResult<()> {
        let contents = tokio::fs::read(&self.local_file).await?;

        tokio::time::timeout(self.timeout, self.upload(&contents))
            .await
            .map_err(|_| {
                BfError::Publish(PublishError::Timeout {
                    stage: "ftp upload".to_string(),
                    seconds: self.timeout.as_secs(),
                })
            })??;

        info!(
            focus = target,
            host = %self.host,
            file = %self.local_file.display(),
            "parameter file uploaded"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "ftp"
    }
}

fn parse_code(line: &str) -> BfResult<u16> {
    line.get(..3)
        .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| transfer(format!("malformed reply line {line:?}")))
}

/// Port from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
fn parse_pasv_port(text: &str) -> BfResult<u16> {
    let malformed = || transfer(format!("malformed PASV reply {text:?}"));

    let open = text.find('(').ok_or_else(malformed)?;
    let close = text[open..].find(')').ok_or_else(malformed)? + open;
    let fields: Vec<u16> = text[open + 1..close]
        .split(',')
        .map(|f| f.trim().parse::<u16>())
        .collect::<Result<_, _>>()
        .map_err(|_| malformed())?;

    match fields.as_slice() {
        [_, _, _, _, high, low] if *high <= 255 && *low <= 255 => Ok(high * 256 + low),
        _ => Err(malformed()),
    }
}

fn transfer(message: impl Into<String>) -> BfError {
    BfError::Publish(PublishError::Transfer {
        message: message.into(),
    })
}

fn unexpected(command: &str, reply: &Reply) -> BfError {
    // Never echo the password back into logs.
    let command = if command.starts_with("PASS") { "PASS" } else { command };
    BfError::Publish(PublishError::UnexpectedReply {
        command: command.to_string(),
        reply: format!("{} {}", reply.code, reply.text),
    })
}
