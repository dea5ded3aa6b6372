use sha2::{Digest, Sha256};
use std::fmt;

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// SHA-256 of the content of one page of process memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct PageDigest {
    /// Address of the first byte of the digested page
    pub virtual_address: u64,
    pub sha256: [u8; 32],
}

impl PageDigest {
    pub fn compute(virtual_address: u64, content: &[u8]) -> PageDigest {
        PageDigest {
            virtual_address,
            sha256: Sha256::digest(content).into(),
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.sha256)
    }
}

impl fmt::Display for PageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_digest() {
        let page = vec![0u8; 4096];
        let d = PageDigest::compute(0x400000, &page);
        assert_eq!(d.virtual_address, 0x400000);
        // sha256 of 4096 zero bytes
        assert_eq!(
            d.to_hex(),
            "ad7facb2586fc6e966c004d7d1d16b024f5805ff7cb47c7a85dabd8b48892ca7"
        );
        assert_eq!(d.to_string(), d.to_hex());

        let mut other = page.clone();
        other[100] = 0xcc;
        assert_ne!(PageDigest::compute(0x400000, &other), d);
    }
}
