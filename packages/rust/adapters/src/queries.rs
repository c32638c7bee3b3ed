//! Query catalog.
//!
//! Variable names are part of each adapter's contract: the normalizers in
//! `wikidata.rs` and `dbpedia.rs` read exactly these bindings.

// ---------------------------------------------------------------------------
// Wikidata
// ---------------------------------------------------------------------------

/// The 24 provinces, pinned by QID.
pub const WIKIDATA_PROVINCES: &str = r#"
PREFIX wd: <http://www.wikidata.org/entity/>
PREFIX wdt: <http://www.wikidata.org/prop/direct/>
PREFIX wikibase: <http://wikiba.se/ontology#>
PREFIX bd: <http://www.bigdata.com/rdf#>
PREFIX schema: <http://schema.org/>

SELECT DISTINCT ?item ?itemLabel ?capitalLabel ?population ?area ?coord ?image ?flag ?article WHERE {
  VALUES ?item {
    wd:Q220451 wd:Q261165 wd:Q321729 wd:Q335471 wd:Q238492 wd:Q241140
    wd:Q466019 wd:Q335526 wd:Q335464 wd:Q321863 wd:Q504238 wd:Q504260
    wd:Q504666 wd:Q549522 wd:Q211900 wd:Q499475 wd:Q214814 wd:Q272586
    wd:Q475038 wd:Q504252 wd:Q1124125 wd:Q1123208 wd:Q499456 wd:Q744670
  }
  OPTIONAL { ?item wdt:P36 ?capital }
  OPTIONAL { ?item wdt:P1082 ?population }
  OPTIONAL { ?item wdt:P2046 ?area }
  OPTIONAL { ?item wdt:P625 ?coord }
  OPTIONAL { ?item wdt:P18 ?image }
  OPTIONAL { ?item wdt:P41 ?flag }
  OPTIONAL {
    ?article schema:about ?item ;
             schema:isPartOf <https://es.wikipedia.org/> .
  }
  SERVICE wikibase:label { bd:serviceParam wikibase:language "es,en" . }
}
ORDER BY ?item
"#;

pub const WIKIDATA_PARKS: &str = r#"
PREFIX wd: <http://www.wikidata.org/entity/>
PREFIX wdt: <http://www.wikidata.org/prop/direct/>
PREFIX wikibase: <http://wikiba.se/ontology#>
PREFIX bd: <http://www.bigdata.com/rdf#>

SELECT DISTINCT ?item ?itemLabel ?itemDescription ?coord ?image ?area ?established ?provinceLabel ?website WHERE {
  ?item (wdt:P31/wdt:P279*) wd:Q46169 ;
        wdt:P17 wd:Q736 .
  OPTIONAL { ?item wdt:P625 ?coord }
  OPTIONAL { ?item wdt:P18 ?image }
  OPTIONAL { ?item wdt:P2046 ?area }
  OPTIONAL { ?item wdt:P571 ?established }
  OPTIONAL { ?item wdt:P131 ?province }
  OPTIONAL { ?item wdt:P856 ?website }
  SERVICE wikibase:label { bd:serviceParam wikibase:language "es,en" . }
}
ORDER BY ?item
"#;

/// Each UNION branch binds `?category` so classification does not depend on
/// the (often missing) type label.
pub const WIKIDATA_HERITAGE: &str = r#"
PREFIX wd: <http://www.wikidata.org/entity/>
PREFIX wdt: <http://www.wikidata.org/prop/direct/>
PREFIX wikibase: <http://wikiba.se/ontology#>
PREFIX bd: <http://www.bigdata.com/rdf#>

SELECT DISTINCT ?item ?itemLabel ?itemDescription ?category ?typeLabel ?coord ?image WHERE {
  ?item wdt:P17 wd:Q736 .
  {
    ?item wdt:P1435 wd:Q9259 .
    BIND("unesco" AS ?category)
  } UNION {
    ?item (wdt:P31/wdt:P279*) wd:Q839954 .
    BIND("archaeological" AS ?category)
  } UNION {
    ?item (wdt:P31/wdt:P279*) wd:Q32815 .
    BIND("historical" AS ?category)
  }
  OPTIONAL { ?item wdt:P31 ?type }
  OPTIONAL { ?item wdt:P625 ?coord }
  OPTIONAL { ?item wdt:P18 ?image }
  SERVICE wikibase:label { bd:serviceParam wikibase:language "es,en" . }
}
ORDER BY ?item
"#;

pub const WIKIDATA_PLAZAS: &str = r#"
PREFIX wd: <http://www.wikidata.org/entity/>
PREFIX wdt: <http://www.wikidata.org/prop/direct/>
PREFIX wikibase: <http://wikiba.se/ontology#>
PREFIX bd: <http://www.bigdata.com/rdf#>

SELECT DISTINCT ?item ?itemLabel ?cityLabel ?coord ?image WHERE {
  ?item (wdt:P31/wdt:P279*) wd:Q174782 ;
        wdt:P17 wd:Q736 .
  OPTIONAL { ?item wdt:P131 ?city }
  OPTIONAL { ?item wdt:P625 ?coord }
  OPTIONAL { ?item wdt:P18 ?image }
  SERVICE wikibase:label { bd:serviceParam wikibase:language "es,en" . }
}
ORDER BY ?item
"#;

// ---------------------------------------------------------------------------
// DBpedia
// ---------------------------------------------------------------------------

/// Provinces with one row per canton (`dbo:subdivision`).
pub const DBPEDIA_PROVINCES: &str = r#"
PREFIX dbo: <http://dbpedia.org/ontology/>
PREFIX dbr: <http://dbpedia.org/resource/>
PREFIX dbp: <http://dbpedia.org/property/>
PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>
PREFIX owl: <http://www.w3.org/2002/07/owl#>
PREFIX foaf: <http://xmlns.com/foaf/0.1/>
PREFIX geo: <http://www.w3.org/2003/01/geo/wgs84_pos#>

SELECT DISTINCT ?province ?label ?population ?area ?flag ?wikidata ?lat ?long
                ?canton ?cantonLabel ?cantonAbstract ?cantonSeat ?cantonPopulation
                ?cantonLat ?cantonLong WHERE {
  ?province dbo:country dbr:Ecuador ;
            rdfs:label ?label .
  FILTER(CONTAINS(STR(?province), "_Province"))
  FILTER(LANG(?label) = "es" || LANG(?label) = "en")
  OPTIONAL { ?province dbo:populationTotal ?population }
  OPTIONAL { ?province dbo:areaTotal ?area }
  OPTIONAL {
    ?province foaf:depiction ?flag .
    FILTER(CONTAINS(LCASE(STR(?flag)), "flag"))
  }
  OPTIONAL {
    ?province owl:sameAs ?wikidata .
    FILTER(STRSTARTS(STR(?wikidata), "http://www.wikidata.org/entity/"))
  }
  OPTIONAL { ?province geo:lat ?lat ; geo:long ?long }
  OPTIONAL {
    ?province dbo:subdivision ?canton .
    OPTIONAL { ?canton rdfs:label ?cantonLabel . FILTER(LANG(?cantonLabel) = "en") }
    OPTIONAL { ?canton dbo:abstract ?cantonAbstract . FILTER(LANG(?cantonAbstract) = "es") }
    OPTIONAL { ?canton dbp:seat ?cantonSeat }
    OPTIONAL { ?canton dbo:populationTotal ?cantonPopulation }
    OPTIONAL { ?canton geo:lat ?cantonLat ; geo:long ?cantonLong }
  }
}
ORDER BY ?province
"#;

pub const DBPEDIA_PARKS: &str = r#"
PREFIX dbo: <http://dbpedia.org/ontology/>
PREFIX dbp: <http://dbpedia.org/property/>
PREFIX dbc: <http://dbpedia.org/resource/Category:>
PREFIX dct: <http://purl.org/dc/terms/>
PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>
PREFIX owl: <http://www.w3.org/2002/07/owl#>
PREFIX foaf: <http://xmlns.com/foaf/0.1/>
PREFIX geo: <http://www.w3.org/2003/01/geo/wgs84_pos#>

SELECT DISTINCT ?park ?label ?abstract ?area ?established ?provinceLabel ?lat ?long
                ?thumbnail ?website ?wikidata WHERE {
  ?park dct:subject dbc:National_parks_of_Ecuador ;
        rdfs:label ?label .
  FILTER(LANG(?label) = "es" || LANG(?label) = "en")
  OPTIONAL { ?park dbo:abstract ?abstract . FILTER(LANG(?abstract) = "es") }
  OPTIONAL { ?park dbo:areaTotal ?area }
  OPTIONAL { ?park dbp:established ?established }
  OPTIONAL {
    ?park dbo:location ?province .
    FILTER(CONTAINS(STR(?province), "_Province"))
    ?province rdfs:label ?provinceLabel .
    FILTER(LANG(?provinceLabel) = "en")
  }
  OPTIONAL { ?park geo:lat ?lat ; geo:long ?long }
  OPTIONAL { ?park dbo:thumbnail ?thumbnail }
  OPTIONAL { ?park foaf:homepage ?website }
  OPTIONAL {
    ?park owl:sameAs ?wikidata .
    FILTER(STRSTARTS(STR(?wikidata), "http://www.wikidata.org/entity/"))
  }
}
ORDER BY ?park
"#;

/// World Heritage Sites located in Ecuador.
pub const DBPEDIA_HERITAGE: &str = r#"
PREFIX dbo: <http://dbpedia.org/ontology/>
PREFIX dbr: <http://dbpedia.org/resource/>
PREFIX rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#>
PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>
PREFIX owl: <http://www.w3.org/2002/07/owl#>
PREFIX geo: <http://www.w3.org/2003/01/geo/wgs84_pos#>

SELECT DISTINCT ?site ?label ?abstract ?lat ?long ?thumbnail ?wikidata WHERE {
  ?site rdf:type dbo:WorldHeritageSite .
  {
    ?site dbo:country dbr:Ecuador .
  } UNION {
    ?site dbo:location ?location .
    ?location dbo:country dbr:Ecuador .
  }
  ?site rdfs:label ?label .
  FILTER(LANG(?label) = "es" || LANG(?label) = "en")
  OPTIONAL { ?site dbo:abstract ?abstract . FILTER(LANG(?abstract) = "es") }
  OPTIONAL { ?site geo:lat ?lat ; geo:long ?long }
  OPTIONAL { ?site dbo:thumbnail ?thumbnail }
  OPTIONAL {
    ?site owl:sameAs ?wikidata .
    FILTER(STRSTARTS(STR(?wikidata), "http://www.wikidata.org/entity/"))
  }
}
ORDER BY ?site
"#;
