use bitstream_io::{BigEndian, BitWrite, BitWriter, Endianness};

use super::{
    ParseError,
    common::{PacketComponent, read_name, read_u16, read_u32, write_name},
    enums::{DNSResourceClass, DNSResourceType},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSResource {
    pub labels: Vec<String>,
    pub rtype: DNSResourceType,
    pub rclass: DNSResourceClass,
    pub ttl: u32,
    pub rdata: RData,
}

/// Record data. Only SOA is decoded; everything else is carried opaque.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RData {
    Soa(SoaData),
    Raw(Vec<u8>),
}

impl Default for RData {
    fn default() -> Self {
        RData::Raw(Vec::new())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SoaData {
    pub mname: Vec<String>,
    pub rname: Vec<String>,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

impl SoaData {
    fn read_at(buf: &[u8], offset: usize) -> Result<(Self, usize), ParseError> {
        let (mname, pos) = read_name(buf, offset)?;
        let (rname, pos) = read_name(buf, pos)?;
        let soa = SoaData {
            mname,
            rname,
            serial: read_u32(buf, pos)?,
            refresh: read_u32(buf, pos + 4)?,
            retry: read_u32(buf, pos + 8)?,
            expire: read_u32(buf, pos + 12)?,
            minimum: read_u32(buf, pos + 16)?,
        };
        Ok((soa, pos + 20))
    }
}

impl RData {
    fn encode(&self) -> Result<Vec<u8>, ParseError> {
        match self {
            RData::Raw(bytes) => Ok(bytes.clone()),
            RData::Soa(soa) => {
                let mut buf = Vec::new();
                {
                    let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut buf);
                    write_name(&mut writer, &soa.mname)?;
                    write_name(&mut writer, &soa.rname)?;
                    writer.write_var::<u32>(32, soa.serial)?;
                    writer.write_var::<u32>(32, soa.refresh)?;
                    writer.write_var::<u32>(32, soa.retry)?;
                    writer.write_var::<u32>(32, soa.expire)?;
                    writer.write_var::<u32>(32, soa.minimum)?;
                }
                Ok(buf)
            }
        }
    }
}

impl DNSResource {
    /// Build an SOA record for `labels`
    pub fn soa(labels: Vec<String>, ttl: u32, soa: SoaData) -> Self {
        DNSResource {
            labels,
            rtype: DNSResourceType::SOA,
            rclass: DNSResourceClass::IN,
            ttl,
            rdata: RData::Soa(soa),
        }
    }

    pub fn soa_data(&self) -> Option<&SoaData> {
        match &self.rdata {
            RData::Soa(soa) => Some(soa),
            RData::Raw(_) => None,
        }
    }
}

impl PacketComponent for DNSResource {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        let rdata = self.rdata.encode()?;
        if rdata.len() > u16::MAX as usize {
            return Err(ParseError::InvalidAnswerSection);
        }
        self.write_labels(writer, &self.labels)?;
        writer.write_var::<u16>(16, self.rtype.into())?;
        writer.write_var::<u16>(16, self.rclass.into())?;
        writer.write_var::<u32>(32, self.ttl)?;
        writer.write_var::<u16>(16, rdata.len() as u16)?;
        writer.write_bytes(&rdata)?;
        Ok(())
    }

    fn read_at(buf: &[u8], offset: usize) -> Result<(Self, usize), ParseError> {
        let (labels, pos) = read_name(buf, offset)?;
        let rtype: DNSResourceType = read_u16(buf, pos)?.into();
        let rclass = read_u16(buf, pos + 2)?.into();
        let ttl = read_u32(buf, pos + 4)?;
        let rdlength = read_u16(buf, pos + 8)? as usize;
        let rdata_start = pos + 10;
        let rdata_end = rdata_start + rdlength;
        if rdata_end > buf.len() {
            return Err(ParseError::Truncated);
        }

        let rdata = if rtype == DNSResourceType::SOA {
            // SOA names may be compressed against the whole message
            let (soa, consumed_to) = SoaData::read_at(buf, rdata_start)?;
            if consumed_to != rdata_end {
                return Err(ParseError::InvalidAnswerSection);
            }
            RData::Soa(soa)
        } else {
            RData::Raw(buf[rdata_start..rdata_end].to_vec())
        };

        Ok((
            DNSResource {
                labels,
                rtype,
                rclass,
                ttl,
                rdata,
            },
            rdata_end,
        ))
    }
}
