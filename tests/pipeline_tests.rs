//! End-to-end pipelines: parse, query, transform, validate.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use xmlwrap::{
    BundleSources, Document, Error, ParamValue, Schema, StrictDocument, Stylesheet, Transform,
    TransformChain,
};

#[test]
fn query_with_registered_namespace() {
    let doc = Document::from_string("<r xmlns:x=\"urn:x\"><x:a>1</x:a></r>")
        .unwrap()
        .register_ns("x", "urn:x")
        .unwrap();
    assert_eq!(doc.xpath("/r/x:a/text()").unwrap(), vec!["1".to_string()]);
}

#[test]
fn extracted_nodes_query_standalone() {
    let doc = Document::from_string(
        "<orders><order id=\"1\"><total>10</total></order>\
         <order id=\"2\"><total>20</total></order></orders>",
    )
    .unwrap();
    let orders = doc.nodes("/orders/order").unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(
        orders[1].xpath("/order/total/text()").unwrap(),
        vec!["20".to_string()]
    );
}

#[test]
fn transform_then_validate() {
    let xsl = Stylesheet::from_string(
        r#"<xsl:stylesheet version="1.0"
            xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
          <xsl:template match="/">
            <payment currency="{/order/@currency}">
              <id><xsl:value-of select="/order/@id"/></id>
            </payment>
          </xsl:template>
        </xsl:stylesheet>"#,
    );
    let xsd = Document::from_string(
        r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
          <xs:element name="payment">
            <xs:complexType>
              <xs:sequence>
                <xs:element name="id" type="xs:integer"/>
              </xs:sequence>
              <xs:attribute name="currency" type="xs:string" use="required"/>
            </xs:complexType>
          </xs:element>
        </xs:schema>"#,
    )
    .unwrap();

    let order = Document::from_string("<order currency=\"EUR\" id=\"333\"/>").unwrap();
    let payment = xsl.apply_to(&order).unwrap();
    assert_eq!(
        payment.render(),
        "<payment currency=\"EUR\"><id>333</id></payment>"
    );

    let strict = StrictDocument::against(payment, &xsd).unwrap();
    assert_eq!(
        strict.xpath("/payment/id/text()").unwrap(),
        vec!["333".to_string()]
    );
}

#[test]
fn strict_gate_rejects_before_any_read() {
    let schema = Schema::from_string(
        r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
          <xs:element name="payment" type="xs:integer"/>
        </xs:schema>"#,
    )
    .unwrap();
    let doc = Document::from_string("<payment>not-a-number</payment>").unwrap();
    match StrictDocument::new(doc, &schema) {
        Err(Error::SchemaViolation(violations)) => assert_eq!(violations.len(), 1),
        other => panic!("expected SchemaViolation, got {other:?}"),
    }
}

#[test]
fn chain_of_two_stylesheets_equals_sequential_application() {
    let first = Stylesheet::from_string(
        r#"<xsl:stylesheet version="1.0"
            xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
          <xsl:template match="/">
            <stage1><xsl:value-of select="/input/text()"/></stage1>
          </xsl:template>
        </xsl:stylesheet>"#,
    );
    let second = Stylesheet::from_string(
        r#"<xsl:stylesheet version="1.0"
            xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
          <xsl:template match="/">
            <stage2><xsl:value-of select="/stage1/text()"/></stage2>
          </xsl:template>
        </xsl:stylesheet>"#,
    );
    let input = Document::from_string("<input>payload</input>").unwrap();

    let chained = TransformChain::new()
        .then(first.boxed())
        .then(second.boxed())
        .apply_to(&input)
        .unwrap();
    let sequential = second.apply_to(&first.apply_to(&input).unwrap()).unwrap();

    assert_eq!(chained, sequential);
    assert_eq!(chained.render(), "<stage2>payload</stage2>");
}

#[test]
fn empty_chain_is_identity() {
    let input = Document::from_string("<r a=\"1\"><b>x</b></r>").unwrap();
    let output = TransformChain::new().apply_to(&input).unwrap();
    assert_eq!(output, input);
    assert_eq!(output.render(), input.render());
}

#[test]
fn chain_parameter_reaches_every_member() {
    let stamp = r#"<xsl:stylesheet version="1.0"
        xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
      <xsl:param name="tag" select="'none'"/>
      <xsl:template match="/">
        <step by="{$tag}"><xsl:copy-of select="/*"/></step>
      </xsl:template>
    </xsl:stylesheet>"#;
    let chain = TransformChain::new()
        .then(Stylesheet::from_string(stamp).boxed())
        .then(Stylesheet::from_string(stamp).boxed())
        .with_param("tag", ParamValue::from("audit"));

    let input = Document::from_string("<r/>").unwrap();
    let output = chain.apply_to(&input).unwrap();
    assert_eq!(
        output.render(),
        "<step by=\"audit\"><step by=\"audit\"><r/></step></step>"
    );
}

#[test]
fn unresolvable_import_fails_with_resource_not_found() {
    let xsl = Stylesheet::from_string(
        r#"<xsl:stylesheet version="1.0"
            xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
          <xsl:import href="shared/common.xsl"/>
          <xsl:template match="/"><out/></xsl:template>
        </xsl:stylesheet>"#,
    );
    let doc = Document::from_string("<r/>").unwrap();
    // The default resolver resolves nothing.
    assert!(matches!(
        xsl.apply_to(&doc),
        Err(Error::ResourceNotFound { .. })
    ));
}

#[test]
fn bundled_import_participates_in_matching() {
    let common = r#"<xsl:stylesheet version="1.0"
        xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
      <xsl:template match="line"><row><xsl:value-of select="."/></row></xsl:template>
    </xsl:stylesheet>"#;
    let main = r#"<xsl:stylesheet version="1.0"
        xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
      <xsl:import href="common.xsl"/>
      <xsl:template match="/">
        <table><xsl:apply-templates select="/doc/line"/></table>
      </xsl:template>
    </xsl:stylesheet>"#;

    let xsl = Stylesheet::from_string(main).with_sources(Arc::new(
        BundleSources::new().with_resource("common.xsl", common),
    ));
    let doc = Document::from_string("<doc><line>a</line><line>b</line></doc>").unwrap();
    assert_eq!(
        xsl.apply_to(&doc).unwrap().render(),
        "<table><row>a</row><row>b</row></table>"
    );
}

#[test]
fn transform_output_carries_conventional_context() {
    let xsl = Stylesheet::from_string(
        r#"<xsl:stylesheet version="1.0"
            xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
          <xsl:template match="/"><out/></xsl:template>
        </xsl:stylesheet>"#,
    );
    let input = Document::from_string("<r/>")
        .unwrap()
        .register_ns("custom", "urn:custom")
        .unwrap();
    let output = xsl.apply_to(&input).unwrap();
    // The input's extra binding does not leak into the output.
    assert_eq!(output.context().uri("custom"), None);
    assert_eq!(output.context().uri("xs"), Some("http://www.w3.org/2001/XMLSchema"));
}

#[test]
fn render_of_reparsed_render_is_identical() {
    let doc = Document::from_string(
        "<r xmlns:z=\"urn:z\" b=\"2\" a=\"1\"><!-- dropped --><z:c>text &amp; more</z:c></r>",
    )
    .unwrap();
    let again = Document::from_string(doc.render()).unwrap();
    assert_eq!(doc.render(), again.render());
    assert_eq!(doc, again);
}
