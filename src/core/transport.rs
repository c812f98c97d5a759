use tracing::{debug, warn};

use crate::core::error::TransportError;
use crate::core::job::ChannelSelector;

/// Delivers one message. Failures are reported as `false`, never propagated.
pub trait Transport: Send + Sync {
    fn send(&self, address: &str, body: &str, channel: ChannelSelector) -> bool;
}

/// Low-level sending backend wrapped by [`CarrierTransport`].
pub trait Carrier: Send + Sync {
    type Handle: std::fmt::Debug;

    /// The path used when no channel is requested or resolution fails.
    fn default_handle(&self) -> Self::Handle;

    /// Maps a non-default selector to a concrete path, if it exists.
    fn resolve(&self, channel: ChannelSelector) -> Option<Self::Handle>;

    /// Sends all parts of one message as a single linked operation.
    fn submit(
        &self,
        handle: &Self::Handle,
        address: &str,
        parts: &[String],
    ) -> Result<(), TransportError>;
}

/// Channel selection and segmentation on top of a [`Carrier`].
pub struct CarrierTransport<C> {
    carrier: C,
}

impl<C: Carrier> CarrierTransport<C> {
    pub fn new(carrier: C) -> Self {
        Self { carrier }
    }

    pub fn carrier(&self) -> &C {
        &self.carrier
    }

    fn handle_for(&self, channel: ChannelSelector) -> C::Handle {
        if channel.is_default() {
            return self.carrier.default_handle();
        }
        match self.carrier.resolve(channel) {
            Some(handle) => handle,
            None => {
                debug!(%channel, "channel unavailable, using default");
                self.carrier.default_handle()
            }
        }
    }
}

impl<C: Carrier> Transport for CarrierTransport<C> {
    fn send(&self, address: &str, body: &str, channel: ChannelSelector) -> bool {
        let handle = self.handle_for(channel);
        let parts = split_message(body);
        match self.carrier.submit(&handle, address, &parts) {
            Ok(()) => true,
            Err(err) => {
                warn!(address, parts = parts.len(), error = %err, "send failed");
                false
            }
        }
    }
}

const GSM_SINGLE: usize = 160;
const GSM_PART: usize = 153;
const UCS2_SINGLE: usize = 70;
const UCS2_PART: usize = 67;

// GSM 03.38 basic set, restricted to what maps one-to-one from Unicode.
const GSM_BASIC: &str = "@£$¥èéùìòÇ\nØø\rÅåΔ_ΦΓΛΩΠΨΣΘΞÆæßÉ !\"#¤%&'()*+,-./0123456789:;<=>?\
¡ABCDEFGHIJKLMNOPQRSTUVWXYZÄÖÑÜ§¿abcdefghijklmnopqrstuvwxyzäöñüà";
const GSM_EXTENDED: &str = "^{}\\[~]|€\u{c}";

fn gsm_width(ch: char) -> Option<usize> {
    if GSM_BASIC.contains(ch) {
        Some(1)
    } else if GSM_EXTENDED.contains(ch) {
        Some(2)
    } else {
        None
    }
}

/// Splits a body into the ordered parts a carrier must send as one
/// multi-part message. Bodies that fit a single segment come back whole.
///
/// GSM-7 text allows 160 septets (153 per part once concatenated, extended
/// characters count twice and are never split across parts); anything else
/// is UCS-2 with 70 characters (67 per part).
pub fn split_message(body: &str) -> Vec<String> {
    let widths: Option<Vec<usize>> = body.chars().map(gsm_width).collect();
    let (widths, single, part) = match widths {
        Some(widths) => (widths, GSM_SINGLE, GSM_PART),
        None => (
            body.chars().map(|ch| ch.len_utf16()).collect(),
            UCS2_SINGLE,
            UCS2_PART,
        ),
    };

    if widths.iter().sum::<usize>() <= single {
        return vec![body.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut used = 0;
    for (ch, width) in body.chars().zip(widths) {
        if used + width > part {
            parts.push(std::mem::take(&mut current));
            used = 0;
        }
        current.push(ch);
        used += width;
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
