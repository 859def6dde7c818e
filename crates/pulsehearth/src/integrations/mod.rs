#[cfg(feature = "integration_adtpulse")]
mod adtpulse;
