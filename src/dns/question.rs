use bitstream_io::{BitWrite, BitWriter, Endianness};

use super::{
    ParseError,
    common::{PacketComponent, read_name, read_u16},
    enums::{DNSResourceClass, DNSResourceType},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSQuestion {
    pub labels: Vec<String>,
    pub qtype: DNSResourceType,
    pub qclass: DNSResourceClass,
}

impl PacketComponent for DNSQuestion {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        self.write_labels(writer, &self.labels)?;
        writer.write_var::<u16>(16, self.qtype.into())?;
        writer.write_var::<u16>(16, self.qclass.into())?;
        Ok(())
    }

    fn read_at(buf: &[u8], offset: usize) -> Result<(Self, usize), ParseError> {
        let (labels, pos) = read_name(buf, offset)?;
        let qtype = read_u16(buf, pos)?.into();
        let qclass = read_u16(buf, pos + 2)?.into();
        Ok((
            DNSQuestion {
                labels,
                qtype,
                qclass,
            },
            pos + 4,
        ))
    }
}
