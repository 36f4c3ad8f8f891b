use std::fmt;

/// Standard opcodes used by the pool manager
pub mod opcode {
    pub const QUERY: u8 = 0;
    pub const NOTIFY: u8 = 4;
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DNSResourceType {
    #[default]
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    HINFO,
    MX,
    TXT,
    AAAA,
    SRV,
    NAPTR,
    DS,
    SSHFP,
    RRSIG,
    NSEC,
    DNSKEY,
    TLSA,
    SPF,
    TSIG,
    IXFR,
    AXFR,
    ANY,
    CAA,
    Unknown(u16),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DNSResourceClass {
    #[default]
    IN,
    CS,
    CH,
    HS,
    NONE,
    ANY,
    Unknown(u16),
}

impl From<u16> for DNSResourceClass {
    fn from(value: u16) -> Self {
        match value {
            1 => DNSResourceClass::IN,
            2 => DNSResourceClass::CS,
            3 => DNSResourceClass::CH,
            4 => DNSResourceClass::HS,
            254 => DNSResourceClass::NONE,
            255 => DNSResourceClass::ANY,
            x => DNSResourceClass::Unknown(x),
        }
    }
}

impl From<DNSResourceClass> for u16 {
    fn from(value: DNSResourceClass) -> Self {
        match value {
            DNSResourceClass::IN => 1,
            DNSResourceClass::CS => 2,
            DNSResourceClass::CH => 3,
            DNSResourceClass::HS => 4,
            DNSResourceClass::NONE => 254,
            DNSResourceClass::ANY => 255,
            DNSResourceClass::Unknown(x) => x,
        }
    }
}

impl From<u16> for DNSResourceType {
    fn from(value: u16) -> Self {
        match value {
            1 => DNSResourceType::A,
            2 => DNSResourceType::NS,
            5 => DNSResourceType::CNAME,
            6 => DNSResourceType::SOA,
            12 => DNSResourceType::PTR,
            13 => DNSResourceType::HINFO,
            15 => DNSResourceType::MX,
            16 => DNSResourceType::TXT,
            28 => DNSResourceType::AAAA,
            33 => DNSResourceType::SRV,
            35 => DNSResourceType::NAPTR,
            43 => DNSResourceType::DS,
            44 => DNSResourceType::SSHFP,
            46 => DNSResourceType::RRSIG,
            47 => DNSResourceType::NSEC,
            48 => DNSResourceType::DNSKEY,
            52 => DNSResourceType::TLSA,
            99 => DNSResourceType::SPF,
            250 => DNSResourceType::TSIG,
            251 => DNSResourceType::IXFR,
            252 => DNSResourceType::AXFR,
            255 => DNSResourceType::ANY,
            257 => DNSResourceType::CAA,
            x => DNSResourceType::Unknown(x),
        }
    }
}

impl From<DNSResourceType> for u16 {
    fn from(value: DNSResourceType) -> Self {
        match value {
            DNSResourceType::A => 1,
            DNSResourceType::NS => 2,
            DNSResourceType::CNAME => 5,
            DNSResourceType::SOA => 6,
            DNSResourceType::PTR => 12,
            DNSResourceType::HINFO => 13,
            DNSResourceType::MX => 15,
            DNSResourceType::TXT => 16,
            DNSResourceType::AAAA => 28,
            DNSResourceType::SRV => 33,
            DNSResourceType::NAPTR => 35,
            DNSResourceType::DS => 43,
            DNSResourceType::SSHFP => 44,
            DNSResourceType::RRSIG => 46,
            DNSResourceType::NSEC => 47,
            DNSResourceType::DNSKEY => 48,
            DNSResourceType::TLSA => 52,
            DNSResourceType::SPF => 99,
            DNSResourceType::TSIG => 250,
            DNSResourceType::IXFR => 251,
            DNSResourceType::AXFR => 252,
            DNSResourceType::ANY => 255,
            DNSResourceType::CAA => 257,
            DNSResourceType::Unknown(x) => x,
        }
    }
}

impl DNSResourceType {
    /// Parse a record type mnemonic such as "MX" or "TYPE65"
    pub fn from_mnemonic(s: &str) -> Option<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let rtype = match upper.as_str() {
            "A" => DNSResourceType::A,
            "NS" => DNSResourceType::NS,
            "CNAME" => DNSResourceType::CNAME,
            "SOA" => DNSResourceType::SOA,
            "PTR" => DNSResourceType::PTR,
            "HINFO" => DNSResourceType::HINFO,
            "MX" => DNSResourceType::MX,
            "TXT" => DNSResourceType::TXT,
            "AAAA" => DNSResourceType::AAAA,
            "SRV" => DNSResourceType::SRV,
            "NAPTR" => DNSResourceType::NAPTR,
            "DS" => DNSResourceType::DS,
            "SSHFP" => DNSResourceType::SSHFP,
            "RRSIG" => DNSResourceType::RRSIG,
            "NSEC" => DNSResourceType::NSEC,
            "DNSKEY" => DNSResourceType::DNSKEY,
            "TLSA" => DNSResourceType::TLSA,
            "SPF" => DNSResourceType::SPF,
            "CAA" => DNSResourceType::CAA,
            other => {
                let code = other.strip_prefix("TYPE")?.parse::<u16>().ok()?;
                DNSResourceType::from(code)
            }
        };
        Some(rtype)
    }
}

impl fmt::Display for DNSResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DNSResourceType::Unknown(code) => write!(f, "TYPE{}", code),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    NoError = 0,
    FormatError = 1,
    ServerFailure = 2,
    NameError = 3,
    NotImplemented = 4,
    Refused = 5,
    NotAuth = 9,
}

impl ResponseCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ResponseCode::NoError),
            1 => Some(ResponseCode::FormatError),
            2 => Some(ResponseCode::ServerFailure),
            3 => Some(ResponseCode::NameError),
            4 => Some(ResponseCode::NotImplemented),
            5 => Some(ResponseCode::Refused),
            9 => Some(ResponseCode::NotAuth),
            _ => None,
        }
    }

    /// True for the rcodes a nameserver returns when it does not serve the zone
    pub fn means_no_zone(&self) -> bool {
        matches!(
            self,
            ResponseCode::NameError | ResponseCode::Refused | ResponseCode::ServerFailure
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_codes_roundtrip_through_u16() {
        for code in [1u16, 6, 250, 252, 257, 4242] {
            let rtype = DNSResourceType::from(code);
            assert_eq!(u16::from(rtype), code);
        }
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(DNSResourceType::from_mnemonic("mx"), Some(DNSResourceType::MX));
        assert_eq!(
            DNSResourceType::from_mnemonic("TYPE65"),
            Some(DNSResourceType::Unknown(65))
        );
        assert_eq!(DNSResourceType::from_mnemonic("bogus"), None);
        assert_eq!(DNSResourceType::Unknown(65).to_string(), "TYPE65");
        assert_eq!(DNSResourceType::SOA.to_string(), "SOA");
    }

    #[test]
    fn test_no_zone_rcodes() {
        assert!(ResponseCode::NameError.means_no_zone());
        assert!(ResponseCode::Refused.means_no_zone());
        assert!(ResponseCode::ServerFailure.means_no_zone());
        assert!(!ResponseCode::NoError.means_no_zone());
        assert!(!ResponseCode::NotAuth.means_no_zone());
    }
}
