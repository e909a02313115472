// This file is part of mixpki and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

//! Log formatting for peer identifiers and keys.

use crate::descriptor::LinkKey;

/// Upper-case hex rendering of a link key.
pub fn link_key_string(key: &LinkKey) -> String {
    hex::encode_upper(key.as_bytes())
}

/// Printable rendering of untrusted handshake bytes for debug logs.
///
/// Every byte that is not printable ASCII is replaced with `*`; the output
/// is lossy and only meant for humans.
pub fn printable_bytes(data: &[u8]) -> String {
    data.iter()
        .map(|&byte| {
            if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte)
            } else {
                '*'
            }
        })
        .collect()
}
