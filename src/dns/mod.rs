pub mod client;
pub mod common;
pub mod enums;
pub mod header;
pub mod question;
pub mod resource;
pub mod tsig;

use bitstream_io::{BigEndian, BitWriter};
use common::{PacketComponent, name_to_labels, names_equal, labels_to_name};
use enums::{DNSResourceClass, DNSResourceType, ResponseCode, opcode};
use header::DNSHeader;
use question::DNSQuestion;
use resource::DNSResource;
use tracing::trace;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSPacket {
    pub header: DNSHeader,
    pub questions: Vec<DNSQuestion>,
    pub answers: Vec<DNSResource>,
    pub authorities: Vec<DNSResource>,
    pub resources: Vec<DNSResource>,
}

#[derive(Debug)]
pub enum ParseError {
    InvalidHeader,
    InvalidLabel,
    InvalidQuestionSection,
    InvalidAnswerSection,
    InvalidAuthoritySection,
    InvalidAdditionalSection,
    Truncated,
    CompressionLoop,
    InvalidBitStream(String),
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        ParseError::InvalidBitStream(e.to_string())
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidHeader => write!(f, "Invalid DNS header"),
            ParseError::InvalidLabel => write!(f, "Invalid DNS label"),
            ParseError::InvalidQuestionSection => write!(f, "Invalid question section"),
            ParseError::InvalidAnswerSection => write!(f, "Invalid answer section"),
            ParseError::InvalidAuthoritySection => write!(f, "Invalid authority section"),
            ParseError::InvalidAdditionalSection => write!(f, "Invalid additional section"),
            ParseError::Truncated => write!(f, "Message truncated"),
            ParseError::CompressionLoop => write!(f, "Name compression loop"),
            ParseError::InvalidBitStream(e) => write!(f, "Invalid bit stream: {}", e),
        }
    }
}

impl std::error::Error for ParseError {}

fn read_section(
    buf: &[u8],
    offset: &mut usize,
    count: u16,
    on_error: fn() -> ParseError,
) -> Result<Vec<DNSResource>, ParseError> {
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (record, next) = DNSResource::read_at(buf, *offset).map_err(|e| match e {
            ParseError::Truncated | ParseError::CompressionLoop | ParseError::InvalidLabel => e,
            _ => on_error(),
        })?;
        records.push(record);
        *offset = next;
    }
    Ok(records)
}

impl DNSPacket {
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        trace!("Parsing DNS packet, size: {} bytes", buf.len());
        let (header, mut offset) = DNSHeader::read_at(buf, 0)?;

        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            let (question, next) =
                DNSQuestion::read_at(buf, offset).map_err(|_| ParseError::InvalidQuestionSection)?;
            questions.push(question);
            offset = next;
        }

        let answers = read_section(buf, &mut offset, header.ancount, || {
            ParseError::InvalidAnswerSection
        })?;
        let authorities = read_section(buf, &mut offset, header.nscount, || {
            ParseError::InvalidAuthoritySection
        })?;
        let resources = read_section(buf, &mut offset, header.arcount, || {
            ParseError::InvalidAdditionalSection
        })?;

        Ok(DNSPacket {
            header,
            questions,
            answers,
            authorities,
            resources,
        })
    }

    /// Serialize to wire format. Section counts are taken from the sections
    /// themselves, not from the header fields.
    pub fn serialize(&self) -> Result<Vec<u8>, ParseError> {
        let mut buf = Vec::with_capacity(512);
        {
            let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut buf);

            let mut header = self.header.clone();
            header.qdcount = self.questions.len() as u16;
            header.ancount = self.answers.len() as u16;
            header.nscount = self.authorities.len() as u16;
            header.arcount = self.resources.len() as u16;
            header.write(&mut writer)?;

            for question in &self.questions {
                question.write(&mut writer)?;
            }
            for answer in &self.answers {
                answer.write(&mut writer)?;
            }
            for authority in &self.authorities {
                authority.write(&mut writer)?;
            }
            for resource in &self.resources {
                resource.write(&mut writer)?;
            }
        }
        Ok(buf)
    }

    fn request(opcode: u8, zone_name: &str, qtype: DNSResourceType) -> Self {
        DNSPacket {
            header: DNSHeader {
                id: rand::random(),
                opcode,
                qdcount: 1,
                ..Default::default()
            },
            questions: vec![DNSQuestion {
                labels: name_to_labels(zone_name),
                qtype,
                qclass: DNSResourceClass::IN,
            }],
            ..Default::default()
        }
    }

    /// NOTIFY (RFC 1996) for `zone_name`, with the authoritative flag set
    pub fn notify(zone_name: &str) -> Self {
        let mut packet = Self::request(opcode::NOTIFY, zone_name, DNSResourceType::SOA);
        packet.header.aa = true;
        packet
    }

    /// Non-recursive SOA query for `zone_name`
    pub fn soa_query(zone_name: &str) -> Self {
        Self::request(opcode::QUERY, zone_name, DNSResourceType::SOA)
    }

    /// AXFR request for `zone_name`
    pub fn axfr_query(zone_name: &str) -> Self {
        Self::request(opcode::QUERY, zone_name, DNSResourceType::AXFR)
    }

    /// Build a response skeleton for this request
    pub fn response(&self, rcode: ResponseCode, authoritative: bool) -> Self {
        DNSPacket {
            header: DNSHeader {
                id: self.header.id,
                qr: true,
                opcode: self.header.opcode,
                aa: authoritative,
                rcode: rcode as u8,
                qdcount: self.questions.len() as u16,
                ..Default::default()
            },
            questions: self.questions.clone(),
            ..Default::default()
        }
    }

    pub fn response_code(&self) -> Option<ResponseCode> {
        ResponseCode::from_u8(self.header.rcode)
    }

    /// The name of the first question, as a fully-qualified name
    pub fn question_name(&self) -> Option<String> {
        self.questions.first().map(|q| labels_to_name(&q.labels))
    }

    /// Serial of the SOA answer whose owner is `zone_name`, if any
    pub fn soa_serial_for(&self, zone_name: &str) -> Option<u32> {
        self.answers
            .iter()
            .filter(|rr| rr.rtype == DNSResourceType::SOA)
            .filter(|rr| names_equal(&labels_to_name(&rr.labels), zone_name))
            .find_map(|rr| rr.soa_data().map(|soa| soa.serial))
    }

    /// Minimal shape check for a response to `request`
    pub fn answers_request(&self, request: &DNSPacket) -> bool {
        if !self.header.qr || self.header.id != request.header.id {
            return false;
        }
        if self.header.opcode != request.header.opcode {
            return false;
        }
        // An empty question section is tolerated (some servers strip it)
        match (self.questions.first(), request.questions.first()) {
            (Some(got), Some(sent)) => {
                got.qtype == sent.qtype
                    && names_equal(&labels_to_name(&got.labels), &labels_to_name(&sent.labels))
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resource::SoaData;

    fn soa_answer(zone: &str, serial: u32) -> DNSResource {
        DNSResource::soa(
            name_to_labels(zone),
            3600,
            SoaData {
                mname: name_to_labels("ns1.example.com."),
                rname: name_to_labels("hostmaster.example.com."),
                serial,
                refresh: 3600,
                retry: 600,
                expire: 86400,
                minimum: 300,
            },
        )
    }

    #[test]
    fn test_notify_packet_shape() {
        let packet = DNSPacket::notify("example.com.");
        assert_eq!(packet.header.opcode, opcode::NOTIFY);
        assert!(packet.header.aa);
        assert!(!packet.header.qr);
        assert_eq!(packet.questions.len(), 1);
        assert_eq!(packet.questions[0].qtype, DNSResourceType::SOA);
        assert_eq!(packet.question_name().unwrap(), "example.com.");
    }

    #[test]
    fn test_serialize_parse_soa_response() {
        let query = DNSPacket::soa_query("example.com.");
        let mut response = query.response(ResponseCode::NoError, true);
        response.answers.push(soa_answer("example.com.", 2024010101));

        let bytes = response.serialize().unwrap();
        let parsed = DNSPacket::parse(&bytes).unwrap();

        assert!(parsed.answers_request(&query));
        assert_eq!(parsed.header.ancount, 1);
        assert_eq!(parsed.soa_serial_for("EXAMPLE.com"), Some(2024010101));
        assert_eq!(parsed.soa_serial_for("example.org."), None);
    }

    #[test]
    fn test_parse_compressed_soa() {
        // Header, question example.com SOA IN, answer with pointers into the question
        let mut buf = vec![
            0x12, 0x34, 0x84, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
        ];
        buf.extend_from_slice(&[
            0x07, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0x03, b'c', b'o', b'm', 0x00,
            0x00, 0x06, 0x00, 0x01,
        ]);
        // owner: pointer to offset 12
        buf.extend_from_slice(&[0xC0, 0x0C, 0x00, 0x06, 0x00, 0x01, 0x00, 0x00, 0x0E, 0x10]);
        // rdata: ns1.<ptr>, hostmaster.<ptr>, five u32s
        let rdata: Vec<u8> = [
            &[0x03, b'n', b's', b'1', 0xC0, 0x0C][..],
            &[0x0A, b'h', b'o', b's', b't', b'm', b'a', b's', b't', b'e', b'r', 0xC0, 0x0C][..],
            &7u32.to_be_bytes(),
            &3600u32.to_be_bytes(),
            &600u32.to_be_bytes(),
            &86400u32.to_be_bytes(),
            &300u32.to_be_bytes(),
        ]
        .concat();
        buf.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        buf.extend_from_slice(&rdata);

        let packet = DNSPacket::parse(&buf).unwrap();
        assert!(packet.header.aa);
        assert!(packet.header.qr);
        assert_eq!(packet.soa_serial_for("example.com."), Some(7));
        let soa = packet.answers[0].soa_data().unwrap();
        assert_eq!(soa.mname, vec!["ns1", "example", "com"]);
    }

    #[test]
    fn test_truncated_packet_is_rejected() {
        let query = DNSPacket::soa_query("example.com.");
        let mut response = query.response(ResponseCode::NoError, true);
        response.answers.push(soa_answer("example.com.", 1));
        let bytes = response.serialize().unwrap();

        assert!(DNSPacket::parse(&bytes[..bytes.len() - 3]).is_err());
        assert!(DNSPacket::parse(&bytes[..5]).is_err());
    }

    #[test]
    fn test_answers_request_rejects_mismatched_id() {
        let query = DNSPacket::soa_query("example.com.");
        let mut response = query.response(ResponseCode::NoError, true);
        response.header.id = query.header.id.wrapping_add(1);
        assert!(!response.answers_request(&query));

        let not_response = query.clone();
        assert!(!not_response.answers_request(&query));
    }
}
