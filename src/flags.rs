use bitflags::bitflags;

bitflags! {
    /// This flags appears in the KRB_AS_REQ and KRB_TGS_REQ requests to
    /// the KDC and indicates the flags that the client wants set on the tickets.
    ///
    /// [KDCOptions](https://www.rfc-editor.org/rfc/rfc4120#section-5.4.1)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct KdcOptions: u32 {
        const FORWARDABLE = 0x40000000;
        const FORWARDED = 0x20000000;
        const PROXIABLE = 0x10000000;
        const PROXY = 0x08000000;
        const ALLOW_POSTDATE = 0x04000000;
        const POSTDATED = 0x02000000;
        const RENEWABLE = 0x00800000;
        const OPT_HARDWARE_AUTH = 0x00100000;
        const CANONICALIZE = 0x00010000;
        const DISABLE_TRANSITED_CHECK = 0x00000020;
        const RENEWABLE_OK = 0x00000010;
        const ENC_TKT_IN_SKEY = 0x00000008;
        const RENEW = 0x00000002;
        const VALIDATE = 0x00000001;
    }
}

bitflags! {
    /// Flags of an issued ticket. The ticket cache stores them as a 32-bit
    /// big-endian integer with the same bit layout.
    ///
    /// [TicketFlags](https://www.rfc-editor.org/rfc/rfc4120#section-5.3)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct TicketFlags: u32 {
        const FORWARDABLE = 0x40000000;
        const FORWARDED = 0x20000000;
        const PROXIABLE = 0x10000000;
        const PROXY = 0x08000000;
        const MAY_POSTDATE = 0x04000000;
        const POSTDATED = 0x02000000;
        const INVALID = 0x01000000;
        const RENEWABLE = 0x00800000;
        const INITIAL = 0x00400000;
        const PRE_AUTHENT = 0x00200000;
        const HW_AUTHENT = 0x00100000;
        const TRANSITED_POLICY_CHECKED = 0x00080000;
        const OK_AS_DELEGATE = 0x00040000;
        const ENC_PA_REP = 0x00010000;
        const ANONYMOUS = 0x00008000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_req_options_layout() {
        let options = KdcOptions::RENEWABLE | KdcOptions::CANONICALIZE | KdcOptions::RENEWABLE_OK;

        assert_eq!(options.bits().to_be_bytes(), [0x00, 0x81, 0x00, 0x10]);
    }

    #[test]
    fn unknown_ticket_flag_bits_are_kept() {
        let flags = TicketFlags::from_bits_retain(0x00e0_0001);

        assert!(flags.contains(TicketFlags::RENEWABLE | TicketFlags::INITIAL | TicketFlags::PRE_AUTHENT));
        assert_eq!(flags.bits(), 0x00e0_0001);
    }
}
