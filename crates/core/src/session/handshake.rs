use crate::error::{Result, StreamError};
use crate::frame::MediaTrack;
use crate::protocol::{Credentials, Method, RtspResponse, SessionCommands};
use crate::transport::RtspConnection;

/// How the server treated authentication during ANNOUNCE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    NotRequired,
    Accepted,
}

fn expect_ok(step: &'static str, response: &RtspResponse) -> Result<()> {
    if response.is_success() {
        Ok(())
    } else {
        Err(StreamError::Handshake {
            step,
            status: response.status_code,
        })
    }
}

/// Run the publishing handshake: OPTIONS, ANNOUNCE (answering one auth
/// challenge), SETUP for each track in order, RECORD.
pub fn perform(
    conn: &mut RtspConnection,
    commands: &mut SessionCommands,
    sdp: String,
    tracks: &[MediaTrack],
    credentials: Option<&Credentials>,
) -> Result<AuthOutcome> {
    let response = conn.request(&commands.options())?;
    commands.on_response(Method::Options, None, &response);
    expect_ok("OPTIONS", &response)?;

    let response = conn.request(&commands.announce(sdp.clone()))?;
    commands.on_response(Method::Announce, None, &response);
    let outcome = match response.status_code {
        200 => {
            tracing::info!("announce accepted");
            AuthOutcome::NotRequired
        }
        403 => return Err(StreamError::AccessDenied),
        401 => {
            let Some(credentials) = credentials else {
                tracing::warn!("server requires authentication, no credentials set");
                return Err(StreamError::AuthRequired);
            };
            if !commands.authorize(&response, credentials) {
                tracing::warn!("no supported authentication scheme offered");
                return Err(StreamError::AuthRejected);
            }
            let response = conn.request(&commands.announce(sdp))?;
            commands.on_response(Method::Announce, None, &response);
            match response.status_code {
                200 => AuthOutcome::Accepted,
                401 => return Err(StreamError::AuthRejected),
                status => {
                    return Err(StreamError::Handshake {
                        step: "ANNOUNCE",
                        status,
                    });
                }
            }
        }
        status => {
            return Err(StreamError::Handshake {
                step: "ANNOUNCE",
                status,
            });
        }
    };

    for &track in tracks {
        let response = conn.request(&commands.setup(track))?;
        commands.on_response(Method::Setup, Some(track), &response);
        expect_ok("SETUP", &response)?;
        tracing::debug!(track = track.as_str(), "track set up");
    }

    let response = conn.request(&commands.record())?;
    commands.on_response(Method::Record, None, &response);
    expect_ok("RECORD", &response)?;

    Ok(outcome)
}
