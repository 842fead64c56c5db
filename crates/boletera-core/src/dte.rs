//! DTE payload construction and gross/net/tax decomposition.
//!
//! The register charges gross prices in integer pesos. The document carries
//! net amounts plus VAT, so the gross is decomposed with
//! `net = round(gross / 1.19)` and `tax = gross - net`, which keeps
//! `net + tax == gross` exact for every input.

use serde::Serialize;

/// VAT rate applied to boletas.
pub const IVA_RATE: f64 = 0.19;

/// Document type code for an electronic boleta.
pub const BOLETA_DTE_TYPE: u16 = 39;

/// Fixed RUT for the generic final-consumer receiver.
const FINAL_CONSUMER_RUT: &str = "66666666-6";

/// Gross price decomposed into net and VAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxBreakdown {
    /// Net amount, `round(gross / 1.19)`.
    pub net: i64,
    /// VAT, `gross - net`.
    pub tax: i64,
    /// The original gross amount.
    pub gross: i64,
}

/// Decomposes a gross amount into net and VAT at [`IVA_RATE`].
#[must_use]
pub fn decompose_gross(gross: i64) -> TaxBreakdown {
    #[allow(clippy::cast_possible_truncation)]
    let net = ((gross as f64) / (1.0 + IVA_RATE)).round() as i64;
    TaxBreakdown {
        net,
        tax: gross - net,
        gross,
    }
}

/// Issuer identity stamped on every document.
#[derive(Debug, Clone)]
pub struct IssuerIdentity {
    /// Issuer RUT body (digits, no verifier).
    pub rut: String,
    /// RUT verifier digit.
    pub dv: String,
    /// Registered business name printed on the boleta.
    pub business_name: String,
    /// Registered line of business.
    pub business_line: String,
    /// Origin address.
    pub origin_address: String,
    /// Origin commune.
    pub origin_commune: String,
}

impl IssuerIdentity {
    /// Full RUT with verifier, `body-dv`.
    #[must_use]
    pub fn full_rut(&self) -> String {
        format!("{}-{}", self.rut, self.dv)
    }
}

/// Signing-certificate reference sent alongside every gateway call.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateRef {
    /// RUT of the certificate holder.
    #[serde(rename = "Rut")]
    pub rut: String,
    /// Certificate password.
    #[serde(rename = "Password")]
    pub password: String,
}

/// `IdentificacionDTE` header block.
#[derive(Debug, Clone, Serialize)]
pub struct DteId {
    #[serde(rename = "TipoDTE")]
    doc_type: u16,
    #[serde(rename = "Folio")]
    folio: u64,
    #[serde(rename = "FechaEmision")]
    emission_date: String,
    #[serde(rename = "IndicadorServicio")]
    service_indicator: u8,
    #[serde(rename = "IndicadorMontosNetosBoleta")]
    net_amounts_indicator: u8,
}

/// `Emisor` header block.
#[derive(Debug, Clone, Serialize)]
pub struct EmitterBlock {
    #[serde(rename = "Rut")]
    rut: String,
    #[serde(rename = "RazonSocialBoleta")]
    business_name: String,
    #[serde(rename = "GiroBoleta")]
    business_line: String,
    #[serde(rename = "DireccionOrigen")]
    origin_address: String,
    #[serde(rename = "ComunaOrigen")]
    origin_commune: String,
}

/// `Receptor` header block, always the generic final consumer.
#[derive(Debug, Clone, Serialize)]
pub struct ReceiverBlock {
    #[serde(rename = "Rut")]
    rut: String,
    #[serde(rename = "RazonSocial")]
    name: String,
    #[serde(rename = "Direccion")]
    address: String,
    #[serde(rename = "Comuna")]
    commune: String,
}

impl Default for ReceiverBlock {
    fn default() -> Self {
        Self {
            rut: FINAL_CONSUMER_RUT.to_string(),
            name: "Consumidor final".to_string(),
            address: "Sin dirección".to_string(),
            commune: "Santiago".to_string(),
        }
    }
}

/// `Totales` header block; amounts are net per the indicator flag.
#[derive(Debug, Clone, Serialize)]
pub struct TotalsBlock {
    #[serde(rename = "MontoNeto")]
    net: i64,
    #[serde(rename = "IVA")]
    tax: i64,
    #[serde(rename = "MontoTotal")]
    total: i64,
    #[serde(rename = "MontoExento")]
    exempt: i64,
}

/// One detail line.
#[derive(Debug, Clone, Serialize)]
pub struct DetailLine {
    #[serde(rename = "IndicadorExento")]
    exempt_indicator: u8,
    #[serde(rename = "Nombre")]
    name: String,
    #[serde(rename = "Cantidad")]
    quantity: u32,
    #[serde(rename = "Precio")]
    unit_price: i64,
    #[serde(rename = "MontoItem")]
    line_amount: i64,
}

/// `Encabezado` block.
#[derive(Debug, Clone, Serialize)]
pub struct Header {
    #[serde(rename = "IdentificacionDTE")]
    id: DteId,
    #[serde(rename = "Emisor")]
    emitter: EmitterBlock,
    #[serde(rename = "Receptor")]
    receiver: ReceiverBlock,
    #[serde(rename = "Totales")]
    totals: TotalsBlock,
}

/// `Documento` block.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    #[serde(rename = "Encabezado")]
    header: Header,
    #[serde(rename = "Detalles")]
    details: Vec<DetailLine>,
}

/// Full generation payload: document plus certificate reference.
#[derive(Debug, Clone, Serialize)]
pub struct DtePayload {
    #[serde(rename = "Documento")]
    document: Document,
    #[serde(rename = "Certificado")]
    certificate: CertificateRef,
}

impl DtePayload {
    /// The folio embedded in the document header.
    #[must_use]
    pub fn folio(&self) -> u64 {
        self.document.header.id.folio
    }
}

/// Line item handed to payload construction.
#[derive(Debug, Clone)]
pub struct SaleItem {
    /// Product description.
    pub product: String,
    /// Unit gross price in pesos.
    pub unit_gross: i64,
    /// Units sold.
    pub quantity: u32,
    /// Gross total for the line.
    pub gross_total: i64,
}

impl SaleItem {
    /// Single-unit sale.
    #[must_use]
    pub fn single(product: impl Into<String>, gross: i64) -> Self {
        Self {
            product: product.into(),
            unit_gross: gross,
            quantity: 1,
            gross_total: gross,
        }
    }
}

/// Builds the generation payload for one sale under the given folio.
#[must_use]
pub fn build_payload(
    item: &SaleItem,
    folio: u64,
    emission_date: String,
    issuer: &IssuerIdentity,
    certificate: CertificateRef,
) -> DtePayload {
    let totals = decompose_gross(item.gross_total);
    let unit = decompose_gross(item.unit_gross);

    DtePayload {
        document: Document {
            header: Header {
                id: DteId {
                    doc_type: BOLETA_DTE_TYPE,
                    folio,
                    emission_date,
                    service_indicator: 3,
                    net_amounts_indicator: 1,
                },
                emitter: EmitterBlock {
                    rut: issuer.full_rut(),
                    business_name: issuer.business_name.clone(),
                    business_line: issuer.business_line.clone(),
                    origin_address: issuer.origin_address.clone(),
                    origin_commune: issuer.origin_commune.clone(),
                },
                receiver: ReceiverBlock::default(),
                totals: TotalsBlock {
                    net: totals.net,
                    tax: totals.tax,
                    total: totals.gross,
                    exempt: 0,
                },
            },
            details: vec![DetailLine {
                exempt_indicator: 0,
                name: item.product.clone(),
                quantity: item.quantity,
                unit_price: unit.net,
                line_amount: totals.net,
            }],
        },
        certificate,
    }
}
