//! FTP reply codes consumed by the client (RFC 959 §4.2).

/// Data connection already open; transfer starting.
pub const DATA_CONNECTION_ALREADY_OPEN: u16 = 125;
/// File status okay; about to open data connection.
pub const DATA_CONNECTION_OPEN: u16 = 150;
pub const COMMAND_OK: u16 = 200;
/// Reply to SIZE / MDTM.
pub const FILE_STATUS: u16 = 213;
pub const SERVICE_READY: u16 = 220;
pub const SERVICE_CLOSING_CONTROL: u16 = 221;
/// Closing data connection; requested file action successful.
pub const DATA_CONNECTION_CLOSE: u16 = 226;
pub const ENTERING_PASSIVE_MODE: u16 = 227;
pub const LOGGED_IN: u16 = 230;
pub const FILE_ACTION_COMPLETE: u16 = 250;
/// "PATHNAME" created, also the PWD reply.
pub const PATH_CREATED: u16 = 257;
pub const PASSWORD_REQUIRED: u16 = 331;
/// Requested file action pending further information (REST, RNFR).
pub const FILE_ACTION_PENDING: u16 = 350;
pub const SERVICE_CLOSING: u16 = 421;
pub const CANT_OPEN_DATA_CONNECTION: u16 = 425;
pub const TRANSFER_ABORTED: u16 = 426;
pub const LOCAL_PROCESSING_ERROR: u16 = 451;
pub const LOGIN_INCORRECT: u16 = 530;
/// File unavailable (not found, no access). Servers also use it for SIZE on
/// a missing file.
pub const FILE_UNAVAILABLE: u16 = 550;
pub const EXCEEDED_STORAGE: u16 = 552;

/// Whether the server accepted a transfer command and the data connection
/// is (or is about to be) in use.
pub fn is_transfer_open(code: u16) -> bool {
    code == DATA_CONNECTION_OPEN || code == DATA_CONNECTION_ALREADY_OPEN
}

/// Replies that close out a data transfer rather than answer a command.
///
/// 250 is included because some servers answer a finished RETR with it.
pub fn is_transfer_terminal(code: u16) -> bool {
    matches!(
        code,
        DATA_CONNECTION_CLOSE
            | FILE_ACTION_COMPLETE
            | TRANSFER_ABORTED
            | LOCAL_PROCESSING_ERROR
            | EXCEEDED_STORAGE
    )
}

/// Replies that can only close out a data transfer, never answer a command
/// the client sends while one is in flight.
pub fn is_data_completion(code: u16) -> bool {
    code == DATA_CONNECTION_CLOSE || code == TRANSFER_ABORTED
}

/// Short human-readable meaning of a code, for log lines and error text.
pub fn describe(code: u16) -> &'static str {
    match code {
        DATA_CONNECTION_ALREADY_OPEN => "data connection already open",
        DATA_CONNECTION_OPEN => "opening data connection",
        COMMAND_OK => "command ok",
        FILE_STATUS => "file status",
        SERVICE_READY => "service ready",
        SERVICE_CLOSING_CONTROL => "closing control connection",
        DATA_CONNECTION_CLOSE => "transfer complete",
        ENTERING_PASSIVE_MODE => "entering passive mode",
        LOGGED_IN => "logged in",
        FILE_ACTION_COMPLETE => "file action complete",
        PATH_CREATED => "path created",
        PASSWORD_REQUIRED => "password required",
        FILE_ACTION_PENDING => "file action pending",
        SERVICE_CLOSING => "service closing",
        CANT_OPEN_DATA_CONNECTION => "can't open data connection",
        TRANSFER_ABORTED => "transfer aborted",
        LOCAL_PROCESSING_ERROR => "local processing error",
        LOGIN_INCORRECT => "login incorrect",
        FILE_UNAVAILABLE => "file unavailable",
        EXCEEDED_STORAGE => "exceeded storage allocation",
        c if c >= 500 => "permanent negative reply",
        c if c >= 400 => "transient negative reply",
        _ => "unexpected reply",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_open_codes() {
        assert!(is_transfer_open(150));
        assert!(is_transfer_open(125));
        assert!(!is_transfer_open(226));
    }

    #[test]
    fn terminal_codes_exclude_command_replies() {
        assert!(is_transfer_terminal(226));
        assert!(is_transfer_terminal(426));
        for code in [150, 200, 213, 227, 350, 550] {
            assert!(!is_transfer_terminal(code), "{} is not terminal", code);
        }
    }

    #[test]
    fn data_completion_is_narrower_than_terminal() {
        assert!(is_data_completion(226));
        assert!(is_data_completion(426));
        assert!(!is_data_completion(250));
        assert!(!is_data_completion(451));
        assert!(is_transfer_terminal(250));
    }

    #[test]
    fn describe_known_and_fallback() {
        assert_eq!(describe(226), "transfer complete");
        assert_eq!(describe(599), "permanent negative reply");
        assert_eq!(describe(499), "transient negative reply");
    }
}
