use std::{borrow::Cow, fmt, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const KIND_SIZE: usize = size_of::<Header>();
const COMM_SIZE: usize = size_of::<u64>();
const JOB_SIZE: usize = size_of::<u32>();
const FIXED_SIZE: usize = KIND_SIZE + COMM_SIZE + JOB_SIZE + 1;
const PROGRESS_SIZE: usize = size_of::<f32>();

const PROGRESS_ATTACHED: u8 = 0b1;

const START: Header = 1;
const STOP: Header = 2;
const ABORT: Header = 3;
const REQUEST_PROGRESS: Header = 4;
const REQUEST_INTERIM: Header = 5;
const SHUTDOWN: Header = 6;
const PROGRESS: Header = 16;
const INTERIM: Header = 17;
const STOPPED: Header = 18;
const ABORTED: Header = 19;
const FINISHED: Header = 20;

/// Identifies one job on one node.
///
/// `comm` is the communicator id of the pool that owns the node and `job` is a
/// per-pool sequence number, so two pools sharing a transport never act on each
/// other's messages and a late reply from a previous job is recognisable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionTag {
    pub comm: u64,
    pub job: u32,
}

impl SessionTag {
    pub fn new(comm: u64, job: u32) -> Self {
        Self { comm, job }
    }
}

impl fmt::Display for SessionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}/{}", self.comm, self.job)
    }
}

/// The command carried by a `Msg`.
#[derive(Debug, Clone, PartialEq)]
pub enum Command<'a> {
    // dispatcher -> worker
    Start(Cow<'a, [u8]>),
    Stop,
    Abort,
    RequestProgress,
    RequestInterim,
    Shutdown,

    // worker -> dispatcher
    Progress(f32),
    Interim { state: Cow<'a, [u8]>, progress: f32 },
    Stopped { state: Cow<'a, [u8]>, progress: f32 },
    Aborted,
    Finished(Cow<'a, [u8]>),
}

impl Command<'_> {
    /// A short name for the command, used when logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start(_) => "start",
            Command::Stop => "stop",
            Command::Abort => "abort",
            Command::RequestProgress => "request_progress",
            Command::RequestInterim => "request_interim",
            Command::Shutdown => "shutdown",
            Command::Progress(_) => "progress",
            Command::Interim { .. } => "interim",
            Command::Stopped { .. } => "stopped",
            Command::Aborted => "aborted",
            Command::Finished(_) => "finished",
        }
    }

    /// Whether this command travels from the dispatcher to the worker.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Command::Start(_)
                | Command::Stop
                | Command::Abort
                | Command::RequestProgress
                | Command::RequestInterim
                | Command::Shutdown
        )
    }

    /// Detaches the command from the buffer it was deserialized from.
    pub fn into_owned(self) -> Command<'static> {
        fn own(bytes: Cow<'_, [u8]>) -> Cow<'static, [u8]> {
            Cow::Owned(bytes.into_owned())
        }

        match self {
            Command::Start(work) => Command::Start(own(work)),
            Command::Stop => Command::Stop,
            Command::Abort => Command::Abort,
            Command::RequestProgress => Command::RequestProgress,
            Command::RequestInterim => Command::RequestInterim,
            Command::Shutdown => Command::Shutdown,
            Command::Progress(progress) => Command::Progress(progress),
            Command::Interim { state, progress } => Command::Interim {
                state: own(state),
                progress,
            },
            Command::Stopped { state, progress } => Command::Stopped {
                state: own(state),
                progress,
            },
            Command::Aborted => Command::Aborted,
            Command::Finished(result) => Command::Finished(own(result)),
        }
    }

    fn kind(&self) -> Header {
        match self {
            Command::Start(_) => START,
            Command::Stop => STOP,
            Command::Abort => ABORT,
            Command::RequestProgress => REQUEST_PROGRESS,
            Command::RequestInterim => REQUEST_INTERIM,
            Command::Shutdown => SHUTDOWN,
            Command::Progress(_) => PROGRESS,
            Command::Interim { .. } => INTERIM,
            Command::Stopped { .. } => STOPPED,
            Command::Aborted => ABORTED,
            Command::Finished(_) => FINISHED,
        }
    }

    fn parts(&self) -> (Option<f32>, &[u8]) {
        match self {
            Command::Start(work) => (None, work.as_ref()),
            Command::Progress(progress) => (Some(*progress), &[]),
            Command::Interim { state, progress } | Command::Stopped { state, progress } => {
                (Some(*progress), state.as_ref())
            }
            Command::Finished(result) => (None, result.as_ref()),
            _ => (None, &[]),
        }
    }
}

/// The application layer message exchanged between a dispatcher and a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Msg<'a> {
    pub tag: SessionTag,
    pub cmd: Command<'a>,
}

impl<'a> Msg<'a> {
    pub fn new(tag: SessionTag, cmd: Command<'a>) -> Self {
        Self { tag, cmd }
    }

    /// Detaches the message from the buffer it was deserialized from.
    pub fn into_owned(self) -> Msg<'static> {
        Msg {
            tag: self.tag,
            cmd: self.cmd.into_owned(),
        }
    }

    fn invalid<T>(detail: String) -> io::Result<T> {
        Err(io::Error::new(io::ErrorKind::InvalidData, detail))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        let (progress, payload) = self.cmd.parts();
        let flags = if progress.is_some() { PROGRESS_ATTACHED } else { 0 };

        buf.extend_from_slice(&self.cmd.kind().to_be_bytes());
        buf.extend_from_slice(&self.tag.comm.to_be_bytes());
        buf.extend_from_slice(&self.tag.job.to_be_bytes());
        buf.push(flags);

        if let Some(progress) = progress {
            buf.extend_from_slice(&progress.to_be_bytes());
        }

        (!payload.is_empty()).then_some(payload)
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < FIXED_SIZE {
            return Self::invalid(format!(
                "the given buffer is too small {}, must at least be {FIXED_SIZE} bytes",
                buf.len()
            ));
        }

        let (kind, rest) = buf.split_at(KIND_SIZE);
        let (comm, rest) = rest.split_at(COMM_SIZE);
        let (job, rest) = rest.split_at(JOB_SIZE);
        let (flags, mut rest) = rest.split_at(1);

        // SAFETY: Each slice was split to the exact size of its integer above.
        let kind = Header::from_be_bytes(kind.try_into().unwrap());
        let comm = u64::from_be_bytes(comm.try_into().unwrap());
        let job = u32::from_be_bytes(job.try_into().unwrap());
        let tag = SessionTag { comm, job };

        let progress = if flags[0] & PROGRESS_ATTACHED != 0 {
            if rest.len() < PROGRESS_SIZE {
                return Self::invalid(format!("missing progress in a {kind} message"));
            }

            let (progress, payload) = rest.split_at(PROGRESS_SIZE);
            rest = payload;

            // SAFETY: Split to the exact size of an `f32` above.
            Some(f32::from_be_bytes(progress.try_into().unwrap()))
        } else {
            None
        };

        let payload = Cow::Borrowed(rest);

        let cmd = match (kind, progress) {
            (START, None) => Command::Start(payload),
            (STOP, None) => Command::Stop,
            (ABORT, None) => Command::Abort,
            (REQUEST_PROGRESS, None) => Command::RequestProgress,
            (REQUEST_INTERIM, None) => Command::RequestInterim,
            (SHUTDOWN, None) => Command::Shutdown,
            (PROGRESS, Some(progress)) => Command::Progress(progress),
            (INTERIM, Some(progress)) => Command::Interim {
                state: payload,
                progress,
            },
            (STOPPED, Some(progress)) => Command::Stopped {
                state: payload,
                progress,
            },
            (ABORTED, None) => Command::Aborted,
            (FINISHED, None) => Command::Finished(payload),
            (kind, progress) => {
                return Self::invalid(format!(
                    "received an invalid envelope: kind={kind} progress_attached={}",
                    progress.is_some()
                ));
            }
        };

        let carries_payload = matches!(
            cmd,
            Command::Start(_)
                | Command::Interim { .. }
                | Command::Stopped { .. }
                | Command::Finished(_)
        );

        if !carries_payload && !rest.is_empty() {
            return Self::invalid(format!(
                "unexpected {} trailing bytes in a {} message",
                rest.len(),
                cmd.name()
            ));
        }

        Ok(Self { tag, cmd })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAG: SessionTag = SessionTag { comm: 0xfeed, job: 7 };

    fn encode(msg: &Msg<'_>) -> Vec<u8> {
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf).map(<[u8]>::to_vec);
        buf.extend(tail.unwrap_or_default());
        buf
    }

    #[test]
    fn test_stopped_keeps_state_and_progress() {
        let msg = Msg::new(
            TAG,
            Command::Stopped {
                state: Cow::Borrowed(b"state"),
                progress: 42.5,
            },
        );

        let buf = encode(&msg);
        let decoded = Msg::deserialize(&buf).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_control_messages_have_no_payload() {
        let msg = Msg::new(TAG, Command::RequestInterim);
        let mut buf = Vec::new();

        assert!(msg.serialize(&mut buf).is_none());
        assert_eq!(buf.len(), FIXED_SIZE);
    }

    #[test]
    fn test_progress_without_value_is_rejected() {
        let mut buf = encode(&Msg::new(TAG, Command::Progress(1.0)));
        buf[FIXED_SIZE - 1] = 0;
        buf.truncate(FIXED_SIZE);

        let err = Msg::deserialize(&buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let mut buf = encode(&Msg::new(TAG, Command::Stop));
        buf[..KIND_SIZE].copy_from_slice(&99u32.to_be_bytes());

        assert!(Msg::deserialize(&buf).is_err());
    }

    #[test]
    fn test_trailing_bytes_on_abort_are_rejected() {
        let mut buf = encode(&Msg::new(TAG, Command::Abort));
        buf.extend_from_slice(b"junk");

        assert!(Msg::deserialize(&buf).is_err());
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        assert!(Msg::deserialize(&[0, 0, 0, 1]).is_err());
    }
}
