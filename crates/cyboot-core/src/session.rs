//! Bootload session - drives a device through erase/program/verify.

use std::fmt;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::channel::{AppStatus, CommandChannel, CommandError};
use crate::config::SessionConfig;
use crate::cyacd::{FlashRow, RowImageError, RowImageReader};
use crate::events::{BootloadEvent, BootloadObserver, LogLevel, TracingObserver};
use crate::protocol::{APP_SLOT_FIRST, APP_SLOT_LAST, BL_VER_SUPPORT_VERIFY};
use crate::state::{Action, ErrorKind, SessionContext, SessionState};
use crate::transport::{Transport, TransportError};

/// Array/row coordinates of a flash row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLocation {
    pub array_id: u8,
    pub row_number: u16,
}

impl RowLocation {
    pub fn of(row: &FlashRow) -> Self {
        Self {
            array_id: row.array_id,
            row_number: row.row_number,
        }
    }
}

impl fmt::Display for RowLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "array {} row {}", self.array_id, self.row_number)
    }
}

fn at(location: &Option<RowLocation>) -> String {
    location
        .map(|loc| format!(" at {}", loc))
        .unwrap_or_default()
}

/// Failure of a bootload run.
///
/// `location` is the row being processed, or the last completed row when
/// the failure happened between rows.
#[derive(Error, Debug)]
pub enum BootloadError {
    #[error("Row image error{}: {source}", at(.location))]
    Image {
        source: RowImageError,
        location: Option<RowLocation>,
    },

    #[error("Transport error: {source}")]
    Transport { source: TransportError },

    #[error("Failed to enter bootloader: {source}")]
    Start { source: CommandError },

    #[error("Command failed{}: {source}", at(.location))]
    Command {
        source: CommandError,
        location: Option<RowLocation>,
    },

    #[error("Application {slot} is active and cannot be modified")]
    ActiveApplication { slot: u8 },

    #[error("Device reports the application as invalid{}", at(.location))]
    InvalidApplication {
        slot: Option<u8>,
        location: Option<RowLocation>,
    },

    #[error("Aborted{}", at(.location))]
    Aborted { location: Option<RowLocation> },
}

impl BootloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BootloadError::Image {
                source: RowImageError::Io(_),
                ..
            } => ErrorKind::Io,
            BootloadError::Image { .. } => ErrorKind::MalformedImage,
            BootloadError::Transport { .. } => ErrorKind::Io,
            BootloadError::Start { .. } => ErrorKind::Protocol,
            BootloadError::Command { source, .. } => match source {
                CommandError::Transport(_) => ErrorKind::Io,
                CommandError::VerifyMismatch { .. } => ErrorKind::Checksum,
                _ => ErrorKind::Protocol,
            },
            BootloadError::ActiveApplication { .. } => ErrorKind::ActiveApplication,
            BootloadError::InvalidApplication { .. } => ErrorKind::Checksum,
            BootloadError::Aborted { .. } => ErrorKind::Aborted,
        }
    }

    /// Row coordinates attached to the failure, if any.
    pub fn location(&self) -> Option<RowLocation> {
        match self {
            BootloadError::Image { location, .. }
            | BootloadError::Command { location, .. }
            | BootloadError::InvalidApplication { location, .. }
            | BootloadError::Aborted { location } => *location,
            _ => None,
        }
    }

    /// The link to the device failed; nothing more can be sent.
    pub fn is_link_failure(&self) -> bool {
        match self {
            BootloadError::Transport { .. } => true,
            BootloadError::Start { source } | BootloadError::Command { source, .. } => {
                source.is_transport()
            }
            _ => false,
        }
    }

    fn command(source: CommandError, location: Option<RowLocation>) -> Self {
        BootloadError::Command { source, location }
    }
}

/// Cloneable handle that stops a running session at the next row boundary.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Map the caller's 1-based slot to the device slot; anything outside
/// 1..=2 means "no slot".
pub fn device_slot(app_slot: Option<u8>) -> Option<u8> {
    app_slot
        .filter(|slot| (APP_SLOT_FIRST..=APP_SLOT_LAST).contains(slot))
        .map(|slot| slot - APP_SLOT_FIRST)
}

/// Bootload session - owns the command channel (and through it the
/// transport) for the duration of each run.
pub struct BootloadSession<C: CommandChannel, O: BootloadObserver = TracingObserver> {
    channel: C,
    observer: Arc<O>,
    abort: AbortHandle,
    ctx: SessionContext,
}

impl<C: CommandChannel> BootloadSession<C, TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(channel: C) -> Self {
        Self::with_observer(channel, Arc::new(TracingObserver))
    }
}

impl<C: CommandChannel, O: BootloadObserver> BootloadSession<C, O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(channel: C, observer: Arc<O>) -> Self {
        Self {
            channel,
            observer,
            abort: AbortHandle::default(),
            ctx: SessionContext::default(),
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Request the running operation to stop before its next row.
    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn state(&self) -> SessionState {
        self.ctx.state
    }

    pub fn bootloader_version(&self) -> Option<u32> {
        self.ctx.bootloader_version
    }

    /// Rows completed by the last run.
    pub fn rows_done(&self) -> usize {
        self.ctx.rows_done
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    fn emit(&self, event: BootloadEvent) {
        self.observer.on_event(&event);
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(BootloadEvent::Log {
            level,
            message: message.into(),
        });
    }

    fn goto_state(&mut self, to: SessionState) {
        let from = self.ctx.goto_state(to);
        self.emit(BootloadEvent::PhaseChanged { from, to });
    }

    /// Open a row-image file and run `action` over it.
    pub fn run_file<P: AsRef<Path>>(
        &mut self,
        action: Action,
        path: P,
        app_slot: Option<u8>,
        security_key: Option<&[u8]>,
    ) -> Result<(), BootloadError> {
        let mut image = match RowImageReader::open(path) {
            Ok(image) => image,
            Err(source) => {
                self.ctx = SessionContext::default();
                let result = Err(BootloadError::Image {
                    source,
                    location: None,
                });
                self.finish(&result);
                return result;
            }
        };
        self.run(action, &mut image, app_slot, security_key)
    }

    /// Run `action` over `image` with the slot and key from `config`.
    pub fn run_with_config<R: BufRead>(
        &mut self,
        action: Action,
        image: &mut RowImageReader<R>,
        config: &SessionConfig,
    ) -> Result<(), BootloadError> {
        let key = config.security_key.as_ref().map(|key| key.as_bytes());
        self.run(action, image, config.app_slot, key)
    }

    /// Run `action` over every row of `image`.
    ///
    /// `app_slot` 1 or 2 targets that application on multi-application
    /// bootloaders; any other value runs without slot bookkeeping.
    #[instrument(skip_all, fields(action = %action, app_slot = ?app_slot))]
    pub fn run<R: BufRead>(
        &mut self,
        action: Action,
        image: &mut RowImageReader<R>,
        app_slot: Option<u8>,
        security_key: Option<&[u8]>,
    ) -> Result<(), BootloadError> {
        self.abort.reset();
        self.ctx = SessionContext::default();

        let result = self.execute(action, image, app_slot, security_key);
        self.finish(&result);
        result
    }

    fn execute<R: BufRead>(
        &mut self,
        action: Action,
        image: &mut RowImageReader<R>,
        app_slot: Option<u8>,
        security_key: Option<&[u8]>,
    ) -> Result<(), BootloadError> {
        let header = image.read_header().map_err(|source| BootloadError::Image {
            source,
            location: None,
        })?;
        self.goto_state(SessionState::HeaderRead);
        self.channel.set_checksum_type(header.checksum_type);

        self.channel
            .transport()
            .open()
            .map_err(|source| BootloadError::Transport { source })?;
        self.ctx.transport_open = true;

        self.ctx.entered = true;
        let version = self
            .channel
            .start(header.silicon_id, header.silicon_rev, security_key)
            .map_err(|source| BootloadError::Start { source })?;
        self.ctx.bootloader_version = Some(version);
        self.emit(BootloadEvent::OperationStarted {
            bootloader_version: version,
        });
        self.goto_state(SessionState::OperationStarted);

        let slot = device_slot(app_slot);
        self.ctx.app_slot = slot;
        if let Some(slot) = slot
            && let Some(status) = self.query_app_status(slot)?
            && status.active
            && action != Action::Verify
        {
            return Err(BootloadError::ActiveApplication { slot });
        }

        self.goto_state(SessionState::for_action(action));
        self.row_loop(action, image)?;

        self.goto_state(SessionState::Finalizing);
        self.finalize(action, version)
    }

    fn row_loop<R: BufRead>(
        &mut self,
        action: Action,
        image: &mut RowImageReader<R>,
    ) -> Result<(), BootloadError> {
        loop {
            if self.abort.is_aborted() {
                self.log(
                    LogLevel::Warn,
                    format!("Abort requested after {} rows", self.ctx.rows_done),
                );
                return Err(BootloadError::Aborted {
                    location: self.ctx.last_row,
                });
            }

            let row = image.read_row().map_err(|source| BootloadError::Image {
                source,
                location: self.ctx.last_row,
            })?;
            let Some(row) = row else {
                debug!(rows = self.ctx.rows_done, "End of image");
                return Ok(());
            };

            let location = RowLocation::of(&row);
            self.process_row(action, &row)
                .map_err(|source| BootloadError::command(source, Some(location)))?;

            self.ctx.last_row = Some(location);
            self.ctx.rows_done += 1;
            self.emit(BootloadEvent::RowComplete {
                array_id: row.array_id,
                row_number: row.row_number,
            });
        }
    }

    fn process_row(&mut self, action: Action, row: &FlashRow) -> Result<(), CommandError> {
        match action {
            Action::Erase => self.channel.erase_row(row.array_id, row.row_number),
            Action::Program => {
                self.channel
                    .program_row(row.array_id, row.row_number, &row.data)?;
                self.verify_row(row)
            }
            Action::Verify => self.verify_row(row),
        }
    }

    fn verify_row(&mut self, row: &FlashRow) -> Result<(), CommandError> {
        self.channel
            .verify_row(row.array_id, row.row_number, row.verify_checksum())
    }

    /// Application status, or `None` when the bootloader only hosts a single
    /// application and does not know the query.
    fn query_app_status(&mut self, slot: u8) -> Result<Option<AppStatus>, BootloadError> {
        let status = match self.channel.get_app_status(slot) {
            Ok(status) => Some(status),
            Err(e) if e.is_unsupported_command() => {
                debug!(slot, "Single-application bootloader");
                None
            }
            Err(source) => return Err(BootloadError::command(source, self.ctx.last_row)),
        };
        self.emit(BootloadEvent::AppStatus { slot, status });
        Ok(status)
    }

    fn finalize(&mut self, action: Action, version: u32) -> Result<(), BootloadError> {
        let location = self.ctx.last_row;
        if action == Action::Program
            && let Some(slot) = self.ctx.app_slot
        {
            match self.query_app_status(slot)? {
                Some(status) if !status.valid => {
                    return Err(BootloadError::InvalidApplication {
                        slot: Some(slot),
                        location,
                    });
                }
                Some(_) => {
                    self.channel
                        .set_app_status(slot)
                        .map_err(|source| BootloadError::command(source, location))?;
                    self.log(LogLevel::Info, format!("Application {} marked active", slot));
                }
                None => {}
            }
        } else if matches!(action, Action::Program | Action::Verify) {
            if version >= BL_VER_SUPPORT_VERIFY {
                let valid = self
                    .channel
                    .verify_application()
                    .map_err(|source| BootloadError::command(source, location))?;
                if !valid {
                    return Err(BootloadError::InvalidApplication {
                        slot: None,
                        location,
                    });
                }
            } else {
                self.log(
                    LogLevel::Debug,
                    format!(
                        "Bootloader 0x{:06X} cannot verify the whole application, skipping",
                        version
                    ),
                );
            }
        }
        Ok(())
    }

    /// Leave the bootloader and release the link on every exit path.
    fn finish(&mut self, result: &Result<(), BootloadError>) {
        let link_failed = matches!(result, Err(e) if e.is_link_failure());

        if self.ctx.entered {
            if link_failed {
                self.log(LogLevel::Warn, "Link failed, not sending EndBootloadOperation");
            } else if let Err(e) = self.channel.end() {
                self.log(LogLevel::Warn, format!("EndBootloadOperation failed: {}", e));
            }
        }

        if self.ctx.transport_open {
            if let Err(e) = self.channel.transport().close() {
                self.log(LogLevel::Warn, format!("Failed to close transport: {}", e));
            }
            self.ctx.transport_open = false;
        }

        match result {
            Ok(()) => {
                self.goto_state(SessionState::Closed(Ok(())));
                info!(rows = self.ctx.rows_done, "Bootload operation succeeded");
                self.emit(BootloadEvent::Complete);
            }
            Err(e) => {
                let kind = e.kind();
                self.goto_state(SessionState::Closed(Err(kind)));
                self.emit(BootloadEvent::Error {
                    kind,
                    message: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Command, CommandKind, Failure, MockChannel};
    use crate::cyacd::ImageHeader;
    use crate::events::ProgressFn;
    use crate::protocol::{BootloaderStatus, ChecksumType};
    use crate::transport::MockTransport;
    use std::sync::Mutex;

    const VALID_INACTIVE: AppStatus = AppStatus {
        valid: true,
        active: false,
    };
    const VALID_ACTIVE: AppStatus = AppStatus {
        valid: true,
        active: true,
    };

    fn rows() -> Vec<FlashRow> {
        (32..35)
            .map(|r| FlashRow::new(r, vec![r as u8; 16]).unwrap())
            .collect()
    }

    fn image_text(header: ImageHeader, rows: &[FlashRow]) -> String {
        let mut text = format!("{}\r\n", header);
        for row in rows {
            text += &format!("{}\r\n", row);
        }
        text
    }

    fn default_image() -> String {
        image_text(ImageHeader::new(0x04161193, 0x11), &rows())
    }

    fn run_with(
        channel: MockChannel,
        text: &str,
        action: Action,
        app_slot: Option<u8>,
    ) -> (Result<(), BootloadError>, BootloadSession<MockChannel>) {
        let mut session = BootloadSession::new(channel);
        let mut reader = RowImageReader::from_bytes(text.as_bytes());
        let result = session.run(action, &mut reader, app_slot, None);
        (result, session)
    }

    fn row_ops(channel: &MockChannel) -> Vec<Command> {
        channel
            .commands()
            .iter()
            .filter(|c| c.is_row_operation())
            .cloned()
            .collect()
    }

    #[test]
    fn test_program_happy_path() {
        let transport = MockTransport::new();
        let channel = MockChannel::new(transport.clone()).with_version(0x010214);
        let (result, session) = run_with(channel, &default_image(), Action::Program, None);

        result.unwrap();
        assert_eq!(session.state(), SessionState::Closed(Ok(())));
        assert_eq!(session.bootloader_version(), Some(0x010214));
        assert_eq!(session.rows_done(), 3);

        let commands = session.channel().commands();
        assert_eq!(commands[0], Command::SetChecksumType(ChecksumType::Sum));
        assert_eq!(
            commands[1],
            Command::Start {
                silicon_id: 0x04161193,
                silicon_rev: 0x11,
                security_key: None
            }
        );
        let row = &rows()[0];
        assert_eq!(
            commands[2],
            Command::ProgramRow {
                array_id: 0,
                row_number: 32,
                len: 16
            }
        );
        assert_eq!(
            commands[3],
            Command::VerifyRow {
                array_id: 0,
                row_number: 32,
                checksum: row.verify_checksum()
            }
        );
        assert_eq!(row_ops(session.channel()).len(), 6);
        assert_eq!(commands[commands.len() - 2], Command::VerifyApplication);
        assert_eq!(commands[commands.len() - 1], Command::End);

        assert_eq!(transport.open_count(), 1);
        assert_eq!(transport.close_count(), 1);
    }

    #[test]
    fn test_verify_row_checksum_matches_formula() {
        let channel = MockChannel::new(MockTransport::new());
        let (result, session) = run_with(channel, &default_image(), Action::Verify, None);
        result.unwrap();

        for (command, row) in row_ops(session.channel()).iter().zip(rows()) {
            let expected = (row.checksum as u32
                + row.array_id as u32
                + (row.row_number & 0xFF) as u32
                + (row.row_number >> 8) as u32
                + (row.size & 0xFF) as u32
                + (row.size >> 8) as u32)
                % 256;
            assert_eq!(
                *command,
                Command::VerifyRow {
                    array_id: row.array_id,
                    row_number: row.row_number,
                    checksum: expected as u8
                }
            );
        }
    }

    #[test]
    fn test_erase_only_erases() {
        let channel = MockChannel::new(MockTransport::new());
        let (result, session) = run_with(channel, &default_image(), Action::Erase, None);
        result.unwrap();

        let channel = session.channel();
        assert_eq!(channel.count(CommandKind::EraseRow), 3);
        assert_eq!(channel.count(CommandKind::VerifyRow), 0);
        assert_eq!(channel.count(CommandKind::VerifyApplication), 0);
        assert_eq!(channel.count(CommandKind::End), 1);
    }

    #[test]
    fn test_program_failure_skips_verify_and_stops() {
        let channel = MockChannel::new(MockTransport::new()).fail_at(
            CommandKind::ProgramRow,
            2,
            Failure::Status(BootloaderStatus::Row),
        );
        let (result, session) = run_with(channel, &default_image(), Action::Program, None);

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(
            err.location(),
            Some(RowLocation {
                array_id: 0,
                row_number: 33
            })
        );
        assert!(err.to_string().contains("array 0 row 33"));

        let ops = row_ops(session.channel());
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[2], Command::ProgramRow { row_number: 33, .. }));
        assert_eq!(session.channel().count(CommandKind::End), 1);
        assert_eq!(session.state(), SessionState::Closed(Err(ErrorKind::Protocol)));
        assert_eq!(session.rows_done(), 1);
    }

    #[test]
    fn test_single_app_status_is_not_an_error() {
        for action in [Action::Erase, Action::Program, Action::Verify] {
            let channel = MockChannel::new(MockTransport::new()).single_app();
            let (with_slot, session) = run_with(channel, &default_image(), action, Some(1));
            let (without_slot, plain) = run_with(
                MockChannel::new(MockTransport::new()).single_app(),
                &default_image(),
                action,
                None,
            );

            with_slot.unwrap();
            without_slot.unwrap();
            assert_eq!(row_ops(session.channel()), row_ops(plain.channel()));
            assert_eq!(session.channel().count(CommandKind::SetAppStatus), 0);
        }
    }

    #[test]
    fn test_active_app_cannot_be_programmed() {
        for action in [Action::Erase, Action::Program] {
            let channel = MockChannel::new(MockTransport::new()).with_app_status(VALID_ACTIVE);
            let (result, session) = run_with(channel, &default_image(), action, Some(2));

            let err = result.unwrap_err();
            assert!(matches!(err, BootloadError::ActiveApplication { slot: 1 }));
            assert_eq!(err.kind(), ErrorKind::ActiveApplication);
            assert!(row_ops(session.channel()).is_empty());
            assert_eq!(session.channel().count(CommandKind::End), 1);
        }
    }

    #[test]
    fn test_active_app_can_be_verified() {
        let channel = MockChannel::new(MockTransport::new()).with_app_status(VALID_ACTIVE);
        let (result, session) = run_with(channel, &default_image(), Action::Verify, Some(1));
        result.unwrap();
        assert_eq!(session.channel().count(CommandKind::VerifyRow), 3);
    }

    #[test]
    fn test_program_marks_slot_active() {
        let channel = MockChannel::new(MockTransport::new()).with_app_status(VALID_INACTIVE);
        let (result, session) = run_with(channel, &default_image(), Action::Program, Some(2));
        result.unwrap();

        let commands = session.channel().commands();
        assert_eq!(commands[2], Command::GetAppStatus(1));
        assert_eq!(commands[commands.len() - 3], Command::GetAppStatus(1));
        assert_eq!(commands[commands.len() - 2], Command::SetAppStatus(1));
        // The slot branch replaces the whole-image verify.
        assert_eq!(session.channel().count(CommandKind::VerifyApplication), 0);
    }

    #[test]
    fn test_invalid_app_after_program() {
        let channel = MockChannel::new(MockTransport::new())
            .queue_app_status(VALID_INACTIVE)
            .with_app_status(AppStatus {
                valid: false,
                active: false,
            });
        let (result, session) = run_with(channel, &default_image(), Action::Program, Some(1));

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Checksum);
        assert_eq!(err.location().map(|l| l.row_number), Some(34));
        assert_eq!(session.channel().count(CommandKind::SetAppStatus), 0);
        assert_eq!(session.channel().count(CommandKind::End), 1);
    }

    #[test]
    fn test_old_bootloader_skips_application_verify() {
        let channel = MockChannel::new(MockTransport::new()).with_version(0x010213);
        let (result, session) = run_with(channel, &default_image(), Action::Verify, None);
        result.unwrap();
        assert_eq!(session.channel().count(CommandKind::VerifyApplication), 0);
    }

    #[test]
    fn test_application_verify_failure() {
        let channel = MockChannel::new(MockTransport::new())
            .with_version(0x010300)
            .with_application_valid(false);
        let (result, session) = run_with(channel, &default_image(), Action::Program, None);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Checksum);
        assert_eq!(session.channel().count(CommandKind::End), 1);
    }

    #[test]
    fn test_row_verify_mismatch_is_checksum_error() {
        let channel = MockChannel::new(MockTransport::new()).fail_at(
            CommandKind::VerifyRow,
            1,
            Failure::VerifyMismatch(0x00),
        );
        let (result, _) = run_with(channel, &default_image(), Action::Verify, None);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Checksum);
        assert_eq!(err.location().map(|l| l.row_number), Some(32));
    }

    #[test]
    fn test_transport_failure_skips_end() {
        let transport = MockTransport::new();
        let channel =
            MockChannel::new(transport.clone()).fail_at(CommandKind::ProgramRow, 1, Failure::Disconnect);
        let (result, session) = run_with(channel, &default_image(), Action::Program, None);

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.is_link_failure());
        assert_eq!(session.channel().count(CommandKind::End), 0);
        assert_eq!(session.channel().count(CommandKind::VerifyRow), 0);
        assert_eq!(transport.close_count(), 1);
    }

    #[test]
    fn test_start_rejected_still_ends() {
        let channel = MockChannel::new(MockTransport::new()).fail_at(
            CommandKind::Start,
            1,
            Failure::Status(BootloaderStatus::Key),
        );
        let (result, session) = run_with(channel, &default_image(), Action::Program, None);

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(row_ops(session.channel()).is_empty());
        assert_eq!(session.channel().count(CommandKind::End), 1);
        assert_eq!(session.bootloader_version(), None);
    }

    #[test]
    fn test_start_link_failure_skips_end() {
        let transport = MockTransport::new();
        let channel =
            MockChannel::new(transport.clone()).fail_at(CommandKind::Start, 1, Failure::Disconnect);
        let (result, session) = run_with(channel, &default_image(), Action::Erase, None);

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Protocol);
        assert_eq!(session.channel().count(CommandKind::End), 0);
        assert_eq!(transport.close_count(), 1);
    }

    #[test]
    fn test_security_key_forwarded() {
        let mut session = BootloadSession::new(MockChannel::new(MockTransport::new()));
        let text = default_image();
        let mut reader = RowImageReader::from_bytes(text.as_bytes());
        let key = [1, 2, 3, 4, 5, 6];
        session
            .run(Action::Erase, &mut reader, None, Some(&key))
            .unwrap();
        assert!(matches!(
            &session.channel().commands()[1],
            Command::Start { security_key: Some(k), .. } if k == &key
        ));
    }

    #[test]
    fn test_checksum_type_forwarded() {
        let header = ImageHeader {
            checksum_type: ChecksumType::Crc16,
            ..ImageHeader::new(0x04C81193, 0x11)
        };
        let text = image_text(header, &rows());
        let (result, session) = run_with(
            MockChannel::new(MockTransport::new()),
            &text,
            Action::Verify,
            None,
        );
        result.unwrap();
        assert_eq!(session.channel().checksum_type(), ChecksumType::Crc16);
    }

    #[test]
    fn test_malformed_row_stops_run() {
        let mut text = default_image();
        // Corrupt the checksum of the second row.
        let second = rows()[1].to_string();
        let mut corrupt = second.clone();
        corrupt.replace_range(second.len() - 2.., "00");
        text = text.replace(&second, &corrupt);

        let (result, session) = run_with(
            MockChannel::new(MockTransport::new()),
            &text,
            Action::Program,
            None,
        );
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedImage);
        assert_eq!(err.location().map(|l| l.row_number), Some(32));
        assert_eq!(row_ops(session.channel()).len(), 2);
        assert_eq!(session.channel().count(CommandKind::End), 1);
    }

    #[test]
    fn test_bad_header_never_touches_device() {
        let transport = MockTransport::new();
        let (result, session) = run_with(MockChannel::new(transport.clone()), "", Action::Program, None);

        assert_eq!(result.unwrap_err().kind(), ErrorKind::MalformedImage);
        assert!(session.channel().commands().is_empty());
        assert_eq!(transport.open_count(), 0);
        assert_eq!(transport.close_count(), 0);
    }

    #[test]
    fn test_open_failure_is_io() {
        let transport = MockTransport::new();
        transport.disconnect();
        let (result, session) =
            run_with(MockChannel::new(transport.clone()), &default_image(), Action::Erase, None);

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Io);
        assert_eq!(session.channel().count(CommandKind::Start), 0);
        assert_eq!(session.state(), SessionState::Closed(Err(ErrorKind::Io)));
    }

    /// Aborts through the session's handle once `after` rows completed.
    struct AbortAfter {
        handle: Mutex<Option<AbortHandle>>,
        after: usize,
        seen: Mutex<usize>,
    }

    impl BootloadObserver for AbortAfter {
        fn on_event(&self, event: &BootloadEvent) {
            if let BootloadEvent::RowComplete { .. } = event {
                let mut seen = self.seen.lock().unwrap();
                *seen += 1;
                if *seen == self.after
                    && let Some(handle) = self.handle.lock().unwrap().as_ref()
                {
                    handle.abort();
                }
            }
        }
    }

    #[test]
    fn test_abort_mid_run() {
        let observer = Arc::new(AbortAfter {
            handle: Mutex::new(None),
            after: 1,
            seen: Mutex::new(0),
        });
        let mut session =
            BootloadSession::with_observer(MockChannel::new(MockTransport::new()), observer.clone());
        *observer.handle.lock().unwrap() = Some(session.abort_handle());

        let text = default_image();
        let mut reader = RowImageReader::from_bytes(text.as_bytes());
        let err = session
            .run(Action::Program, &mut reader, None, None)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Aborted);
        assert_eq!(err.location().map(|l| l.row_number), Some(32));
        assert_eq!(session.state(), SessionState::Closed(Err(ErrorKind::Aborted)));
        // Row 32 was programmed and verified; nothing followed the abort.
        assert_eq!(row_ops(session.channel()).len(), 2);
        assert_eq!(session.channel().count(CommandKind::VerifyApplication), 0);
        assert_eq!(session.channel().count(CommandKind::End), 1);
    }

    #[test]
    fn test_abort_flag_cleared_per_run() {
        let mut session = BootloadSession::new(MockChannel::new(MockTransport::new()));
        session.abort();
        let text = default_image();
        let mut reader = RowImageReader::from_bytes(text.as_bytes());
        session
            .run(Action::Verify, &mut reader, None, None)
            .unwrap();
        assert!(!session.abort_handle().is_aborted());
    }

    #[test]
    fn test_progress_callback_per_row() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer = Arc::new(ProgressFn(move |array_id: u8, row: u16| {
            sink.lock().unwrap().push((array_id, row))
        }));
        let mut session =
            BootloadSession::with_observer(MockChannel::new(MockTransport::new()), observer);
        let text = default_image();
        let mut reader = RowImageReader::from_bytes(text.as_bytes());
        session
            .run(Action::Erase, &mut reader, None, None)
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(0, 32), (0, 33), (0, 34)]);
    }

    #[test]
    fn test_run_file() {
        let path = std::env::temp_dir().join(format!("cyboot-session-{}.cyacd", std::process::id()));
        std::fs::write(&path, default_image()).unwrap();
        let mut session = BootloadSession::new(MockChannel::new(MockTransport::new()));
        let result = session.run_file(Action::Verify, &path, None, None);
        std::fs::remove_file(&path).unwrap();
        result.unwrap();

        assert_eq!(session.state(), SessionState::Closed(Ok(())));
        assert_eq!(session.rows_done(), 3);

        let missing = session.run_file(Action::Verify, "/nonexistent/image.cyacd", None, None);
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::Io);
        assert_eq!(session.state(), SessionState::Closed(Err(ErrorKind::Io)));
        assert_eq!(session.rows_done(), 0);
        assert_eq!(session.bootloader_version(), None);
    }

    #[test]
    fn test_device_slot_mapping() {
        assert_eq!(device_slot(Some(1)), Some(0));
        assert_eq!(device_slot(Some(2)), Some(1));
        assert_eq!(device_slot(Some(0)), None);
        assert_eq!(device_slot(Some(3)), None);
        assert_eq!(device_slot(None), None);
    }

    #[test]
    fn test_status_query_error_is_not_single_app() {
        let channel = MockChannel::new(MockTransport::new()).fail_at(
            CommandKind::GetAppStatus,
            1,
            Failure::Status(BootloaderStatus::Data),
        );
        let (result, session) = run_with(channel, &default_image(), Action::Program, Some(1));

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.location(), None);
        assert!(row_ops(session.channel()).is_empty());
        assert_eq!(session.channel().count(CommandKind::End), 1);
        assert_eq!(session.state(), SessionState::Closed(Err(ErrorKind::Protocol)));
    }

    #[test]
    fn test_final_status_query_error_is_not_single_app() {
        let channel = MockChannel::new(MockTransport::new()).fail_at(
            CommandKind::GetAppStatus,
            2,
            Failure::Status(BootloaderStatus::Data),
        );
        let (result, session) = run_with(channel, &default_image(), Action::Program, Some(1));

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.location().map(|l| l.row_number), Some(34));
        assert_eq!(row_ops(session.channel()).len(), 6);
        assert_eq!(session.channel().count(CommandKind::SetAppStatus), 0);
        assert_eq!(session.channel().count(CommandKind::End), 1);
    }

    #[test]
    fn test_finalize_failure_carries_last_row() {
        let channel = MockChannel::new(MockTransport::new()).fail_at(
            CommandKind::VerifyApplication,
            1,
            Failure::Status(BootloaderStatus::Checksum),
        );
        let (result, _) = run_with(channel, &default_image(), Action::Verify, None);

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(
            err.location(),
            Some(RowLocation {
                array_id: 0,
                row_number: 34
            })
        );
    }

    #[test]
    fn test_run_with_config() {
        let config: SessionConfig = toml::from_str(
            r#"
            app_slot = 2
            security_key = "010203040506"
            "#,
        )
        .unwrap();
        let mut session = BootloadSession::new(MockChannel::new(MockTransport::new()));
        let text = default_image();
        let mut reader = RowImageReader::from_bytes(text.as_bytes());
        session
            .run_with_config(Action::Verify, &mut reader, &config)
            .unwrap();

        let commands = session.channel().commands();
        assert_eq!(
            commands[1],
            Command::Start {
                silicon_id: 0x04161193,
                silicon_rev: 0x11,
                security_key: Some(vec![1, 2, 3, 4, 5, 6])
            }
        );
        assert_eq!(commands[2], Command::GetAppStatus(1));
    }
}
