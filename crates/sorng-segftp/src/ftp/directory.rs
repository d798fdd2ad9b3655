//! Directory and metadata commands: NOOP, CWD, CDUP, MKD, RMD, PWD, LIST,
//! DELE, RNFR/RNTO.

use crate::ftp::control::ControlChannel;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::passive;
use crate::ftp::reply;
use crate::ftp::status;

impl ControlChannel {
    /// Keep-alive.
    pub async fn noop(&mut self) -> FtpResult<()> {
        self.send_command("NOOP").await?.expect_code(status::COMMAND_OK)?;
        Ok(())
    }

    pub async fn cwd(&mut self, path: &str) -> FtpResult<()> {
        self.send_command(&format!("CWD {}", path))
            .await?
            .expect_code(status::FILE_ACTION_COMPLETE)?;
        Ok(())
    }

    /// Move to the parent directory. Servers answer with either 250 or 200.
    pub async fn cdup(&mut self) -> FtpResult<()> {
        let resp = self.send_command("CDUP").await?;
        match resp.code {
            status::FILE_ACTION_COMPLETE | status::COMMAND_OK => Ok(()),
            code => Err(FtpError::from_reply(code, resp.text())),
        }
    }

    // ─── MKD / RMD / PWD ────────────────────────────────────────

    /// Create a directory; returns the path the server reports.
    pub async fn mkdir(&mut self, path: &str) -> FtpResult<String> {
        let resp = self
            .send_command(&format!("MKD {}", path))
            .await?
            .expect_code(status::PATH_CREATED)?;
        // Some servers answer `257 created` with no path at all.
        match reply::parse_reply_with_argument(&resp.raw) {
            Ok(with_arg) => reply::parse_quoted_path(&with_arg).or_else(|_| Ok(path.to_string())),
            Err(_) => Ok(path.to_string()),
        }
    }

    pub async fn rmdir(&mut self, path: &str) -> FtpResult<()> {
        self.send_command(&format!("RMD {}", path))
            .await?
            .expect_code(status::FILE_ACTION_COMPLETE)?;
        Ok(())
    }

    /// Current working directory, unquoted.
    pub async fn pwd(&mut self) -> FtpResult<String> {
        let resp = self.send_command("PWD").await?;
        if resp.code != status::PATH_CREATED {
            return Err(FtpError::from_reply(resp.code, resp.text()));
        }
        let with_arg = reply::parse_reply_with_argument(&resp.raw)?;
        reply::parse_quoted_path(&with_arg)
    }

    // ─── LIST ───────────────────────────────────────────────────

    /// Raw `LIST` output. The listing format is server specific and left
    /// unparsed.
    pub async fn list(&mut self, path: Option<&str>) -> FtpResult<String> {
        let cmd = match path {
            Some(p) => format!("LIST {}", p),
            None => "LIST".to_string(),
        };

        let mut data = passive::open_passive(self).await?;
        let resp = self.send_command(&cmd).await?;
        if !status::is_transfer_open(resp.code) {
            data.abandon();
            return Err(FtpError::from_reply(resp.code, resp.text()));
        }
        let ticket = self.begin_transfer();

        let body = data.read_to_end().await;
        data.abandon();
        ticket.mark_drained();
        let done = self.read_completion(ticket).await?;
        let body = body?;
        if done.code != status::DATA_CONNECTION_CLOSE {
            return Err(FtpError::from_reply(done.code, done.text()));
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    // ─── DELE / RNFR+RNTO ───────────────────────────────────────

    pub async fn delete(&mut self, path: &str) -> FtpResult<()> {
        self.send_command(&format!("DELE {}", path))
            .await?
            .expect_code(status::FILE_ACTION_COMPLETE)?;
        Ok(())
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()> {
        self.send_command(&format!("RNFR {}", from))
            .await?
            .expect_code(status::FILE_ACTION_PENDING)?;
        self.send_command(&format!("RNTO {}", to))
            .await?
            .expect_code(status::FILE_ACTION_COMPLETE)?;
        Ok(())
    }
}
