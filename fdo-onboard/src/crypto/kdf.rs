// This file is part of Astarte.
//
// Copyright 2025, 2026 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Key derivation function of the protocol.

use fdo_protocol::Error;
use fdo_protocol::error::ErrorKind;

/// Label of the FDO key derivation.
pub(crate) const LABEL: &[u8] = b"FIDO-KDF";
/// Context of the FDO key derivation, the context rand is empty for ECDH.
pub(crate) const CONTEXT: &[u8] = b"AutomaticOnboardTunnel";

/// KDF in Counter Mode with a one byte counter and a two bytes output length.
///
/// aws-lc only exposes the variant with a four bytes counter, so it's implemented following the
/// [NIST specification](https://nvlpubs.nist.gov/nistpubs/SpecialPublications/NIST.SP.800-108r1-upd1.pdf).
///
/// The length of the output buffer is the length of the derived key.
pub(crate) fn kdf(
    alg: aws_lc_rs::hmac::Algorithm,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    output: &mut [u8],
) -> Result<(), Error> {
    let h_len = alg.digest_algorithm().output_len;

    let l_bits = output
        .len()
        .checked_mul(8)
        .and_then(|bits| u16::try_from(bits).ok())
        .ok_or(Error::new(ErrorKind::OutOfRange, "kdf output length"))?
        .to_be_bytes();

    let n = u8::try_from(output.len().div_ceil(h_len))
        .map_err(|_| Error::new(ErrorKind::OutOfRange, "kdf iterations"))?;

    let k_in = aws_lc_rs::hmac::Key::new(alg, secret);

    for (i, chunk) in (1..=n).zip(output.chunks_mut(h_len)) {
        // K(i) := PRF(K_IN, [i]_2 || Label || 0x00 || Context || [L]_2)
        let mut prf = aws_lc_rs::hmac::Context::with_key(&k_in);
        prf.update(&[i]);
        prf.update(label);
        prf.update(&[0x00]);
        prf.update(context);
        prf.update(&l_bits);
        let k_i = prf.sign();

        chunk.copy_from_slice(&k_i.as_ref()[..chunk.len()]);
    }

    Ok(())
}
