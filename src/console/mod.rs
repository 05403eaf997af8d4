//! Console module - Interactive menu over stdin/stdout
//!
//! Every menu action is one messaging operation; its failure is printed and
//! the session continues. The session ends on `0` or when input closes.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};

use crate::messaging::{
    IdentityStore, MessageContent, MessagingError, Messenger, PullOutcome, ReceivedMessage,
};
use crate::protocol::MessageType;

const MENU: &str = "
MessageU client at your service.

110) Register
120) Request for clients list
130) Request for public key
140) Request for waiting messages
150) Send a text message
151) Send a request for symmetric key
152) Send your symmetric key
153) Send a file
0) Exit client
";

/// Console errors
#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("Console IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Input closed")]
    InputClosed,

    #[error("{0}")]
    Messaging(#[from] MessagingError),
}

pub type ConsoleResult<T> = Result<T, ConsoleError>;

/// Menu entries, keyed by the number the user types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuCommand {
    Register,
    ClientsList,
    PublicKey,
    PendingMessages,
    SendText,
    RequestSymmetricKey,
    SendSymmetricKey,
    SendFile,
    Exit,
}

impl MenuCommand {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            110 => Some(MenuCommand::Register),
            120 => Some(MenuCommand::ClientsList),
            130 => Some(MenuCommand::PublicKey),
            140 => Some(MenuCommand::PendingMessages),
            150 => Some(MenuCommand::SendText),
            151 => Some(MenuCommand::RequestSymmetricKey),
            152 => Some(MenuCommand::SendSymmetricKey),
            153 => Some(MenuCommand::SendFile),
            0 => Some(MenuCommand::Exit),
            _ => None,
        }
    }

    /// Parse a line of user input
    pub fn parse(input: &str) -> Option<Self> {
        input.trim().parse::<u32>().ok().and_then(Self::from_code)
    }
}

/// Interactive session driving a `Messenger`
pub struct Console<S: IdentityStore, R, W> {
    messenger: Messenger<S>,
    lines: Lines<R>,
    out: W,
    /// Where received files are written
    download_dir: PathBuf,
}

impl<S, R, W> Console<S, R, W>
where
    S: IdentityStore,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(messenger: Messenger<S>, input: R, out: W) -> Self {
        Self {
            messenger,
            lines: input.lines(),
            out,
            download_dir: std::env::temp_dir(),
        }
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.out
    }

    /// Run the menu loop until exit or end of input
    pub async fn run(&mut self) -> io::Result<()> {
        if let Some(me) = self.messenger.me() {
            let greeting = format!("Hello {}!", me.username);
            self.say(&greeting).await?;
        }
        if !self.messenger.is_registered() {
            self.say("No identity found, register (110) before anything else.")
                .await?;
        }

        loop {
            self.say(MENU).await?;
            let Some(line) = self.prompt("?").await? else {
                break;
            };

            let Some(command) = MenuCommand::parse(&line) else {
                self.say("Invalid input, please pick one of the menu numbers.")
                    .await?;
                continue;
            };
            if command == MenuCommand::Exit {
                break;
            }

            match self.execute(command).await {
                Ok(report) => self.say(&report).await?,
                Err(ConsoleError::Messaging(e)) => {
                    tracing::debug!("{:?} failed: {:?}", command, e);
                    let mut report = format!("Error: {}", e);
                    if matches!(&e, MessagingError::Client(c) if c.is_transport()) {
                        report.push_str("\nIs the server in server.info running?");
                    }
                    self.say(&report).await?;
                }
                Err(ConsoleError::InputClosed) => break,
                Err(ConsoleError::Io(e)) => return Err(e),
            }
        }

        tracing::info!("Console session ended");
        Ok(())
    }

    async fn execute(&mut self, command: MenuCommand) -> ConsoleResult<String> {
        match command {
            MenuCommand::Register => {
                let username = self.ask("Please enter a username to register:").await?;
                let id = self.messenger.register(&username).await?;
                Ok(format!("Registered '{}' with id {}", username, id))
            }
            MenuCommand::ClientsList => {
                self.messenger.refresh_users().await?;
                let mut report = String::from("Registered clients:");
                for name in self.messenger.usernames() {
                    report.push_str("\n  ");
                    report.push_str(name);
                }
                Ok(report)
            }
            MenuCommand::PublicKey => {
                let username = self.ask("Please enter a username:").await?;
                self.messenger.fetch_public_key(&username).await?;
                Ok(format!("Public key of '{}' received", username))
            }
            MenuCommand::PendingMessages => {
                let outcome = self.messenger.pull_pending().await?;
                Ok(self.render_pending(outcome).await)
            }
            MenuCommand::SendText => {
                let username = self.ask("Please enter a username to send a message to:").await?;
                let text = self.ask("Enter message:").await?;
                let receipt = self
                    .messenger
                    .send(&username, MessageType::Text, text.as_bytes())
                    .await?;
                Ok(format!("Message {} sent to '{}'", receipt.message_id, username))
            }
            MenuCommand::RequestSymmetricKey => {
                let username = self.ask("Please enter a username:").await?;
                self.messenger
                    .send(&username, MessageType::KeyRequest, &[])
                    .await?;
                Ok(format!("Symmetric key requested from '{}'", username))
            }
            MenuCommand::SendSymmetricKey => {
                let username = self.ask("Please enter a username:").await?;
                self.messenger
                    .send(&username, MessageType::KeyDeliver, &[])
                    .await?;
                Ok(format!("Symmetric key sent to '{}'", username))
            }
            MenuCommand::SendFile => {
                let username = self.ask("Please enter a username to send a file to:").await?;
                let path = self.ask("Enter file path:").await?;
                let receipt = self.messenger.send_file(&username, Path::new(&path)).await?;
                Ok(format!("File sent to '{}' as message {}", username, receipt.message_id))
            }
            MenuCommand::Exit => Ok(String::new()),
        }
    }

    async fn render_pending(&self, outcome: PullOutcome) -> String {
        if outcome.messages.is_empty() && outcome.notes.is_empty() {
            return "No waiting messages".to_string();
        }

        let mut report = String::new();
        for message in &outcome.messages {
            let body = self.message_body(message).await;
            let from = message
                .username
                .clone()
                .unwrap_or_else(|| message.sender.to_hex());
            report.push_str(&format!(
                "From: {}\nContent:\n{}\n-----<EOM>-----\n\n",
                from, body
            ));
        }
        for note in &outcome.notes {
            report.push_str(&format!("Note: {}\n", note));
        }
        report
    }

    /// Text is shown inline; received files are saved and their path shown
    async fn message_body(&self, message: &ReceivedMessage) -> String {
        match (&message.kind, &message.content) {
            (MessageType::File, MessageContent::Plaintext(bytes)) => {
                let path = self
                    .download_dir
                    .join(format!("messageu-{}-{}", message.sender, message.message_id));
                match tokio::fs::write(&path, bytes).await {
                    Ok(()) => path.display().to_string(),
                    Err(e) => {
                        tracing::warn!("Failed saving file {}: {}", path.display(), e);
                        format!("Failed saving received file: {}", e)
                    }
                }
            }
            (_, content) => content.to_string(),
        }
    }

    /// Prompt and read a non-empty answer
    async fn ask(&mut self, question: &str) -> ConsoleResult<String> {
        loop {
            let answer = self.prompt(question).await?.ok_or(ConsoleError::InputClosed)?;
            let answer = answer.trim();
            if !answer.is_empty() {
                return Ok(answer.to_string());
            }
        }
    }

    async fn prompt(&mut self, question: &str) -> io::Result<Option<String>> {
        self.out.write_all(question.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await?;
        self.lines.next_line().await
    }

    async fn say(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityFile;
    use crate::network::{test_server, ProtocolClient, ServerAddress, Transport};
    use crate::protocol::test_support::{response, users_payload};
    use crate::protocol::{Identity, IDENTITY_SIZE};
    use tempfile::TempDir;

    fn messenger(address: ServerAddress, dir: &TempDir) -> Messenger<IdentityFile> {
        let client = ProtocolClient::new(Transport::with_address(address));
        Messenger::new(client, IdentityFile::new(dir.path().join("me.info")))
    }

    fn unreachable_address() -> ServerAddress {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        ServerAddress::new("127.0.0.1", &port.to_string()).unwrap()
    }

    async fn run_session(messenger: Messenger<IdentityFile>, input: &str) -> String {
        let mut console = Console::new(messenger, input.as_bytes(), Vec::new());
        console.run().await.unwrap();
        String::from_utf8(console.into_output()).unwrap()
    }

    #[test]
    fn test_menu_parsing() {
        assert_eq!(MenuCommand::parse("110"), Some(MenuCommand::Register));
        assert_eq!(MenuCommand::parse(" 153 \n"), Some(MenuCommand::SendFile));
        assert_eq!(MenuCommand::parse("0"), Some(MenuCommand::Exit));
        assert_eq!(MenuCommand::parse("111"), None);
        assert_eq!(MenuCommand::parse("send"), None);
        assert_eq!(MenuCommand::parse(""), None);
    }

    #[tokio::test]
    async fn test_failures_do_not_end_session() {
        let dir = TempDir::new().unwrap();
        let output = run_session(
            messenger(unreachable_address(), &dir),
            "999\n140\n150\nbob\n0\n",
        )
        .await;

        assert!(output.contains("Invalid input"));
        assert_eq!(output.matches("Error: Not registered yet").count(), 2);
        assert_eq!(output.matches("110) Register").count(), 4);
    }

    #[tokio::test]
    async fn test_end_of_input_mid_prompt() {
        let dir = TempDir::new().unwrap();
        let output = run_session(messenger(unreachable_address(), &dir), "110\n").await;
        assert!(output.contains("Please enter a username to register:"));
    }

    #[tokio::test]
    async fn test_register_then_list_and_request_key() {
        let dir = TempDir::new().unwrap();
        let assigned = Identity::from_bytes([4; IDENTITY_SIZE]);
        let bob = Identity::from_bytes([2; IDENTITY_SIZE]);
        let mut receipt = bob.as_bytes().to_vec();
        receipt.extend_from_slice(&9u32.to_le_bytes());

        let (address, server) = test_server::spawn(vec![
            response(2100, assigned.as_bytes()),
            response(2101, &users_payload(&[(2, "bob")])),
            response(2103, &receipt),
        ])
        .await;

        let output = run_session(
            messenger(address, &dir),
            "110\ncarol\n120\n151\nbob\n150\nbob\nhello\n0\n",
        )
        .await;

        assert!(output.contains(&format!("Registered 'carol' with id {}", assigned)));
        assert!(output.contains("Registered clients:\n  bob"));
        assert!(output.contains("Symmetric key requested from 'bob'"));
        assert!(output.contains("Error: Missing symmetric key for 'bob'"));
        assert_eq!(server.await.unwrap().len(), 3);
        assert!(dir.path().join("me.info").exists());
    }

    #[tokio::test]
    async fn test_unreachable_server_hint() {
        let dir = TempDir::new().unwrap();
        let output = run_session(messenger(unreachable_address(), &dir), "110
carol
0
").await;

        assert!(output.contains("Error: Transport error: Failed connecting to"));
        assert!(output.contains("Is the server in server.info running?"));
    }

    #[tokio::test]
    async fn test_pending_report() {
        let dir = TempDir::new().unwrap();
        let bob = Identity::from_bytes([2; IDENTITY_SIZE]);
        let stranger = Identity::from_bytes([9; IDENTITY_SIZE]);

        let mut console = Console::new(
            messenger(unreachable_address(), &dir),
            &b""[..],
            Vec::new(),
        );
        console.download_dir = dir.path().to_path_buf();

        let outcome = PullOutcome {
            messages: vec![
                ReceivedMessage {
                    sender: bob,
                    username: Some("bob".to_string()),
                    message_id: 1,
                    kind: MessageType::Text,
                    content: MessageContent::Plaintext(b"lunch?".to_vec()),
                },
                ReceivedMessage {
                    sender: stranger,
                    username: None,
                    message_id: 2,
                    kind: MessageType::Text,
                    content: MessageContent::CannotDecrypt,
                },
                ReceivedMessage {
                    sender: bob,
                    username: Some("bob".to_string()),
                    message_id: 3,
                    kind: MessageType::File,
                    content: MessageContent::Plaintext(b"file body".to_vec()),
                },
            ],
            notes: vec!["Message 4 has unknown type 9 and was skipped".to_string()],
        };

        let report = console.render_pending(outcome).await;
        assert!(report.contains("From: bob\nContent:\nlunch?\n-----<EOM>-----"));
        assert!(report.contains(&format!("From: {}\nContent:\nCan't decrypt message", stranger)));
        assert!(report.ends_with("Note: Message 4 has unknown type 9 and was skipped\n"));

        let saved = dir.path().join(format!("messageu-{}-3", bob));
        assert_eq!(std::fs::read(&saved).unwrap(), b"file body");
        assert!(report.contains(&saved.display().to_string()));

        let empty = console.render_pending(PullOutcome::default()).await;
        assert_eq!(empty, "No waiting messages");
    }
}
