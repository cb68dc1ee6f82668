//! Scripted command channel for testing session logic.
//!
//! Every command is written to the owned [`MockTransport`] (so transport
//! failures surface exactly as they would on a real link) and recorded in a
//! call log. Failures are scripted per command kind and occurrence.

use std::collections::{HashMap, VecDeque};

use super::traits::{AppStatus, CommandChannel, CommandError};
use crate::protocol::{BootloaderStatus, ChecksumType};
use crate::transport::{MockTransport, Transport, TransportError};

/// A command as seen by the mock device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetChecksumType(ChecksumType),
    Start {
        silicon_id: u32,
        silicon_rev: u8,
        security_key: Option<Vec<u8>>,
    },
    End,
    EraseRow {
        array_id: u8,
        row_number: u16,
    },
    ProgramRow {
        array_id: u8,
        row_number: u16,
        len: usize,
    },
    VerifyRow {
        array_id: u8,
        row_number: u16,
        checksum: u8,
    },
    GetAppStatus(u8),
    SetAppStatus(u8),
    VerifyApplication,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SetChecksumType,
    Start,
    End,
    EraseRow,
    ProgramRow,
    VerifyRow,
    GetAppStatus,
    SetAppStatus,
    VerifyApplication,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::SetChecksumType(_) => CommandKind::SetChecksumType,
            Command::Start { .. } => CommandKind::Start,
            Command::End => CommandKind::End,
            Command::EraseRow { .. } => CommandKind::EraseRow,
            Command::ProgramRow { .. } => CommandKind::ProgramRow,
            Command::VerifyRow { .. } => CommandKind::VerifyRow,
            Command::GetAppStatus(_) => CommandKind::GetAppStatus,
            Command::SetAppStatus(_) => CommandKind::SetAppStatus,
            Command::VerifyApplication => CommandKind::VerifyApplication,
        }
    }

    /// Whether this is a per-row flash operation.
    pub fn is_row_operation(&self) -> bool {
        matches!(
            self.kind(),
            CommandKind::EraseRow | CommandKind::ProgramRow | CommandKind::VerifyRow
        )
    }
}

/// Scripted outcome for one command occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Device answers with an error status.
    Status(BootloaderStatus),
    /// Link drops while the command is in flight.
    Disconnect,
    /// Row verification reports a different device checksum.
    VerifyMismatch(u8),
}

/// Mock bootloader behind a [`MockTransport`].
pub struct MockChannel {
    transport: MockTransport,
    log: Vec<Command>,
    checksum_type: ChecksumType,
    bootloader_version: u32,
    app_statuses: VecDeque<Result<AppStatus, BootloaderStatus>>,
    default_app_status: Result<AppStatus, BootloaderStatus>,
    application_valid: bool,
    failures: Vec<(CommandKind, usize, Failure)>,
    counts: HashMap<CommandKind, usize>,
}

impl MockChannel {
    pub fn new(transport: MockTransport) -> Self {
        Self {
            transport,
            log: Vec::new(),
            checksum_type: ChecksumType::Sum,
            bootloader_version: 0x010214,
            app_statuses: VecDeque::new(),
            default_app_status: Ok(AppStatus {
                valid: true,
                active: false,
            }),
            application_valid: true,
            failures: Vec::new(),
            counts: HashMap::new(),
        }
    }

    /// Version reported by `start`.
    pub fn with_version(mut self, version: u32) -> Self {
        self.bootloader_version = version;
        self
    }

    /// Behave like a single-application bootloader: the status query is an
    /// unknown command.
    pub fn single_app(mut self) -> Self {
        self.default_app_status = Err(BootloaderStatus::UnsupportedCommand);
        self
    }

    /// Status returned by every status query not otherwise queued.
    pub fn with_app_status(mut self, status: AppStatus) -> Self {
        self.default_app_status = Ok(status);
        self
    }

    /// Queue a one-shot status query answer.
    pub fn queue_app_status(mut self, status: AppStatus) -> Self {
        self.app_statuses.push_back(Ok(status));
        self
    }

    /// Result of `verify_application`.
    pub fn with_application_valid(mut self, valid: bool) -> Self {
        self.application_valid = valid;
        self
    }

    /// Fail the `occurrence`-th (1-based) command of `kind`.
    pub fn fail_at(mut self, kind: CommandKind, occurrence: usize, failure: Failure) -> Self {
        self.failures.push((kind, occurrence, failure));
        self
    }

    /// Commands that reached the device, in order.
    pub fn commands(&self) -> &[Command] {
        &self.log
    }

    pub fn count(&self, kind: CommandKind) -> usize {
        self.log.iter().filter(|c| c.kind() == kind).count()
    }

    pub fn checksum_type(&self) -> ChecksumType {
        self.checksum_type
    }

    fn exchange(&mut self, command: Command) -> Result<(), CommandError> {
        let kind = command.kind();
        let occurrence = {
            let count = self.counts.entry(kind).or_default();
            *count += 1;
            *count
        };

        self.transport.write(format!("{:?}", command).as_bytes())?;

        let failure = self
            .failures
            .iter()
            .find(|(k, at, _)| *k == kind && *at == occurrence)
            .map(|(_, _, failure)| *failure);
        let expected = match &command {
            Command::VerifyRow { checksum, .. } => *checksum,
            _ => 0,
        };
        self.log.push(command);

        match failure {
            None => Ok(()),
            Some(Failure::Status(status)) => Err(CommandError::Status(status)),
            Some(Failure::Disconnect) => {
                self.transport.disconnect();
                Err(TransportError::Disconnected.into())
            }
            Some(Failure::VerifyMismatch(actual)) => {
                Err(CommandError::VerifyMismatch { expected, actual })
            }
        }
    }
}

impl CommandChannel for MockChannel {
    type Transport = MockTransport;

    fn transport(&mut self) -> &mut MockTransport {
        &mut self.transport
    }

    fn set_checksum_type(&mut self, checksum_type: ChecksumType) {
        self.checksum_type = checksum_type;
        self.log.push(Command::SetChecksumType(checksum_type));
    }

    fn start(
        &mut self,
        silicon_id: u32,
        silicon_rev: u8,
        security_key: Option<&[u8]>,
    ) -> Result<u32, CommandError> {
        self.exchange(Command::Start {
            silicon_id,
            silicon_rev,
            security_key: security_key.map(<[u8]>::to_vec),
        })?;
        Ok(self.bootloader_version)
    }

    fn end(&mut self) -> Result<(), CommandError> {
        self.exchange(Command::End)
    }

    fn erase_row(&mut self, array_id: u8, row_number: u16) -> Result<(), CommandError> {
        self.exchange(Command::EraseRow {
            array_id,
            row_number,
        })
    }

    fn program_row(
        &mut self,
        array_id: u8,
        row_number: u16,
        data: &[u8],
    ) -> Result<(), CommandError> {
        self.exchange(Command::ProgramRow {
            array_id,
            row_number,
            len: data.len(),
        })
    }

    fn verify_row(
        &mut self,
        array_id: u8,
        row_number: u16,
        checksum: u8,
    ) -> Result<(), CommandError> {
        self.exchange(Command::VerifyRow {
            array_id,
            row_number,
            checksum,
        })
    }

    fn get_app_status(&mut self, slot: u8) -> Result<AppStatus, CommandError> {
        self.exchange(Command::GetAppStatus(slot))?;
        self.app_statuses
            .pop_front()
            .unwrap_or(self.default_app_status)
            .map_err(CommandError::Status)
    }

    fn set_app_status(&mut self, slot: u8) -> Result<(), CommandError> {
        self.exchange(Command::SetAppStatus(slot))
    }

    fn verify_application(&mut self) -> Result<bool, CommandError> {
        self.exchange(Command::VerifyApplication)?;
        Ok(self.application_valid)
    }
}
