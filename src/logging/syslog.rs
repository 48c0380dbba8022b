//! System log sink backed by libc `syslog(3)`.

use std::ffi::CString;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use super::{split_message, EventVisitor, MAX_MESSAGE_LEN};
use crate::error::{Error, Result};

/// `LOG_USER` facility.
const FACILITY_USER: libc::c_int = 1 << 3;

/// Forwards every event, debug included, to the system log.
pub struct SyslogLayer {
    /// Program identifier; must outlive the open log.
    _ident: CString,
}

impl SyslogLayer {
    pub fn open(ident: &str) -> Result<Self> {
        let c_ident = CString::new(ident).map_err(|e| Error::Config(format!("invalid syslog ident: {}", e)))?;

        unsafe {
            libc::openlog(c_ident.as_ptr(), libc::LOG_NDELAY | libc::LOG_PID, FACILITY_USER);
        }

        Ok(Self { _ident: c_ident })
    }

    fn write(&self, severity: u8, message: &str) {
        let Ok(c_message) = CString::new(message.replace('\0', " ")) else {
            return;
        };

        unsafe {
            libc::syslog(
                libc::c_int::from(severity),
                b"%s\0".as_ptr() as *const libc::c_char,
                c_message.as_ptr(),
            );
        }
    }
}

impl<S: Subscriber> Layer<S> for SyslogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        let (level, message) = visitor.finish(event.metadata().level());

        for line in message.lines() {
            for chunk in split_message(line, MAX_MESSAGE_LEN) {
                self.write(level.syslog_severity(), &format!("{} {}", level.label(), chunk));
            }
        }
    }
}

impl Drop for SyslogLayer {
    fn drop(&mut self) {
        unsafe {
            libc::closelog();
        }
    }
}
